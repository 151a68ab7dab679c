//! CANopen SDO transfer engine for [`tokio`].
//!
//! This crate implements the SDO (Service Data Object) protocol from
//! CiA 301 §7.2.4: expedited and segmented uploads/downloads between a
//! client and a server, driven over any [`Transport`][transport::Transport].

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod dictionary;
pub mod sdo;
pub mod transport;
