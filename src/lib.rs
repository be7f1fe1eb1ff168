//! TDMA mesh MAC library.
//!
//! Exposes the pure-logic modules for integration testing and external
//! inspection. [`power::HostPowerManager`] is a `std`-backed
//! [`power::PowerManager`] usable from any target that has threads; the
//! `host` feature (default) additionally builds
//! [`adapters::SimTransceiver`], a simulated shared-medium
//! [`transceiver::Transceiver`] for desktop multi-node test harnesses. A
//! real embedded target supplies its own `Transceiver`/`PowerManager`
//! implementations against the same trait boundary.

#![deny(unused_must_use)]

pub mod config;
pub mod diagnostics;
pub mod error;
pub mod keymanager;
pub mod mac;
pub mod packet;
pub mod phases;
pub mod power;
pub mod schedule;
pub mod stream;
pub mod synchronizer;
pub mod time;
pub mod topology;
pub mod transceiver;

#[cfg(feature = "host")]
pub mod adapters;
