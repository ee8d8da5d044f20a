/*
 * registry.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Postern, a SASL client and secure connection library.
 *
 * Postern is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Postern is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Postern.  If not, see <http://www.gnu.org/licenses/>.
 */

//! Name → factory table of client mechanisms. Built once at startup and then shared by reference.

use std::collections::HashMap;

use super::{ClientMechanism, SaslClient, SaslError, SaslMechanism};

pub type MechanismFactory = fn() -> Box<dyn ClientMechanism>;

#[derive(Clone)]
pub struct MechanismEntry {
    pub name: String,
    pub plain_text: bool,
    pub factory: MechanismFactory,
}

impl std::fmt::Debug for MechanismEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MechanismEntry")
            .field("name", &self.name)
            .field("plain_text", &self.plain_text)
            .finish()
    }
}

/// Case-insensitive mechanism table. Registering a name twice replaces the earlier entry.
#[derive(Debug, Clone)]
pub struct MechanismRegistry {
    entries: HashMap<String, MechanismEntry>,
}

impl MechanismRegistry {
    /// Registry holding every built-in mechanism.
    pub fn new() -> Self {
        let mut registry = Self::empty();
        for m in SaslMechanism::ALL {
            registry.entries.insert(
                m.name().to_string(),
                MechanismEntry { name: m.name().to_string(), plain_text: m.is_plain_text(), factory: builtin_factory(m) },
            );
        }
        registry
    }

    pub fn empty() -> Self {
        Self { entries: HashMap::new() }
    }

    pub fn register(
        &mut self,
        name: &str,
        plain_text: bool,
        factory: MechanismFactory,
    ) -> Result<(), SaslError> {
        let key = normalize(name)?;
        self.entries.insert(
            key,
            MechanismEntry { name: name.trim().to_string(), plain_text, factory },
        );
        Ok(())
    }

    /// New client for `name`, or `NotSupported` if nothing is registered under it.
    pub fn create(&self, name: &str) -> Result<SaslClient, SaslError> {
        let entry = self.lookup(name)?;
        Ok(SaslClient::new(&entry.name, entry.plain_text, (entry.factory)()))
    }

    pub fn is_plain_text(&self, name: &str) -> Result<bool, SaslError> {
        Ok(self.lookup(name)?.plain_text)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lookup(name).is_ok()
    }

    /// Registered names, sorted.
    pub fn available(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.values().map(|e| e.name.as_str()).collect();
        names.sort_unstable();
        names
    }

    fn lookup(&self, name: &str) -> Result<&MechanismEntry, SaslError> {
        let key = normalize(name)?;
        self.entries
            .get(&key)
            .ok_or_else(|| SaslError::NotSupported(name.to_string()))
    }
}

impl Default for MechanismRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn normalize(name: &str) -> Result<String, SaslError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(SaslError::InvalidMechanismName);
    }
    Ok(name.to_ascii_uppercase())
}

fn builtin_factory(m: SaslMechanism) -> MechanismFactory {
    match m {
        SaslMechanism::Anonymous => || SaslMechanism::Anonymous.instantiate(),
        SaslMechanism::Login => || SaslMechanism::Login.instantiate(),
        SaslMechanism::Plain => || SaslMechanism::Plain.instantiate(),
        SaslMechanism::CramMd5 => || SaslMechanism::CramMd5.instantiate(),
        SaslMechanism::DigestMd5 => || SaslMechanism::DigestMd5.instantiate(),
        SaslMechanism::Ntlm => || SaslMechanism::Ntlm.instantiate(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::byte_string::ByteString;
    use crate::sasl::{ExchangeOutcome, MechanismContext};

    struct FixedMechanism(&'static str);

    impl ClientMechanism for FixedMechanism {
        fn client_first(&self) -> bool {
            true
        }

        fn exchange(
            &mut self,
            _ctx: &MechanismContext<'_>,
            _challenge: &ByteString,
        ) -> Result<ExchangeOutcome, SaslError> {
            Ok(ExchangeOutcome::succeeded(self.0))
        }

        fn reset(&mut self) {}
    }

    fn first() -> Box<dyn ClientMechanism> {
        Box::new(FixedMechanism("first"))
    }

    fn second() -> Box<dyn ClientMechanism> {
        Box::new(FixedMechanism("second"))
    }

    #[test]
    fn builtins_are_available() {
        let registry = MechanismRegistry::new();
        assert_eq!(
            registry.available(),
            vec!["ANONYMOUS", "CRAM-MD5", "DIGEST-MD5", "LOGIN", "NTLM", "PLAIN"]
        );
        assert!(registry.contains("digest-md5"));
        assert!(registry.is_plain_text("plain").unwrap());
        assert!(!registry.is_plain_text("NTLM").unwrap());
    }

    #[test]
    fn unknown_name_is_not_supported() {
        let registry = MechanismRegistry::new();
        assert!(matches!(registry.create("X-UNKNOWN"), Err(SaslError::NotSupported(n)) if n == "X-UNKNOWN"));
        assert!(matches!(registry.is_plain_text("X-UNKNOWN"), Err(SaslError::NotSupported(_))));
        assert!(matches!(registry.create(""), Err(SaslError::InvalidMechanismName)));
    }

    #[test]
    fn last_registration_wins() {
        let mut registry = MechanismRegistry::empty();
        registry.register("X-CUSTOM", false, first).unwrap();
        registry.register("x-custom", true, second).unwrap();
        assert_eq!(registry.available().len(), 1);
        let mut client = registry.create("X-Custom").unwrap();
        assert!(client.is_plain_text());
        let outcome = client.initial_response().unwrap();
        assert_eq!(outcome.response.unwrap(), "second");
    }

    #[test]
    fn builtin_can_be_replaced() {
        let mut registry = MechanismRegistry::new();
        registry.register("LOGIN", true, first).unwrap();
        let mut client = registry.create("LOGIN").unwrap();
        assert_eq!(client.initial_response().unwrap().response.unwrap(), "first");
    }
}
