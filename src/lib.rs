#![cfg_attr(not(test), no_std)]

extern crate alloc;

#[macro_use]
mod _macros;

pub mod err;
pub mod host;

pub use err::{AdmissionDenied, HcdError, Result};
pub use host::{Controller, dwc::*};
pub use usb_if::{
    DeviceSpeed,
    descriptor::{EndpointDescriptor, EndpointType},
    host::{
        UsbDevice,
        hub::{HubKind, TtLink},
    },
    transfer::Direction,
};
