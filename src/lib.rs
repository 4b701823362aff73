/*!
# Recycling Facility Dashboard Core

Data layer of a dashboard for lithium-battery recycling facilities: the
facility map and list, the document/report library and session-based
authentication.

## Overview

The dashboard keeps its entity collections in memory and mirrors every
change to durable key-value storage. Records are loosely typed; display
values such as status, color and translated labels are derived from them at
render time and never stored.

## Architecture

### Stores
- **FacilityStore** / **DocumentLibrary** - in-memory collections with stable
  ids. Every mutation builds the next collection, writes it through, then
  swaps it in.
- **PersistenceBridge** - whole-collection load/save against a key-value
  store, bundled seed data on first start, blob uploads with a
  session-local fallback.

### Derivation
- **derive** - status priority, status colors, coordinate checks, marker
  sizing.
- **LocalizationResolver** - (language, key) lookup falling back to French,
  then to the key itself.

### Session
- **SessionGuard** - anonymous / authenticating / authenticated state machine
  over a persisted token, gating protected actions.
- **UserDirectory** - argon2-hashed local accounts issuing expiring tokens.

## Modules

- **entity**: ids and loosely-typed records
- **store**: facility collection and document library
- **persistence**: key-value stores and the persistence bridge
- **object_storage**: uploaded file storage and object paths
- **derive**: status, color, coordinates
- **i18n**: translation tables
- **session**: authentication state and gating
- **accounts**: local user accounts
- **remote**: REST read-endpoint records
- **preferences**: dark mode, language, remembered username
- **snapshot**: compressed backup and restore
- **seed**: bundled default data
- **config**: runtime settings
- **app**: JSON HTTP API (feature `web`)
*/

pub mod accounts;
pub mod config;
pub mod derive;
pub mod entity;
pub mod error;
pub mod i18n;
pub mod object_storage;
pub mod persistence;
pub mod preferences;
pub mod remote;
pub mod seed;
pub mod session;
pub mod snapshot;
pub mod store;

#[cfg(feature = "web")]
pub mod app;

pub use error::{DashboardError, DashboardResult};
