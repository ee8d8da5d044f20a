/*
 * lib.rs
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

//! Postern core: SASL client mechanisms and the connection they run over.
//!
//! A caller opens a [`net::Connection`] (optionally upgrading it to TLS), picks a mechanism
//! from a [`sasl::MechanismRegistry`], then feeds server challenges to the resulting
//! [`sasl::SaslClient`] and writes each response through the connection's line stream.

pub mod byte_string;
pub mod config;
pub mod net;
pub mod sasl;
pub mod uri;

pub use byte_string::ByteString;
pub use config::{ConfigError, ConnectionConfig, CredentialSource, KeyringCredentials, MemoryCredentials, TlsMode};
pub use net::{Connection, ConnectionError, StreamUpgrader, TlsUpgrader};
pub use sasl::{Credential, ExchangeOutcome, ExchangeStatus, MechanismRegistry, SaslClient, SaslError, SaslMechanism};
pub use uri::{Scheme, ServerUri};
