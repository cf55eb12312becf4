use futures::future::BoxFuture;

use crate::device::types::BleIdentity;
use crate::error::DeviceError;

/// The part of the BLE stack a pairing session talks to.
///
/// A write resolves once the peripheral acknowledged it (write with response); an `Err`
/// means the accessory never received the command.
pub trait BleTransport: Send + Sync + 'static {
    fn write<'a>(&'a self, identity: &'a BleIdentity, data: &'a [u8]) -> BoxFuture<'a, Result<(), DeviceError>>;
}
