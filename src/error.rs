use std::io;
use std::str::Utf8Error;
use std::time::Duration;
use thiserror::Error;
use btleplug;
use serde_json;

use crate::device::types::BleIdentity;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to determine path to config file")]
    NoConfigPath,

    #[error("Failed to acquire file lock on config file: {source}")]
    CanNotLock { source: io::Error },

    #[error("Failed to encode/decode config as utf-8: {source}")]
    Utf8Error { #[from] source: Utf8Error },

    #[error("Failed to read/write config file: {source}")]
    IOError { #[from] source: io::Error },

    #[error("Failed to parse/build config file: {source}")]
    JsonError { #[from] source: serde_json::Error },
}

#[derive(Error, Debug)]
pub enum AppRunError {
    #[error("Failed to start runtime: {source}")]
    Runtime { #[from] source: io::Error },

    #[error("Failed to start application (config): {source}")]
    ConfigError { #[from] source: ConfigError },

    #[error("Failed to start application (bluetooth): {source}")]
    DeviceError { #[from] source: DeviceError },

    #[error("No matching accessory was found")]
    NoAccessory,
}

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("Error communicating with device (btleplug): {source}")]
    Btle { #[from] source: btleplug::Error },

    #[error("A required bluetooth characteristic is not available")]
    MissingCharacteristic,

    #[error("No bluetooth adapter is available")]
    NoAdapter,

    #[error("Peripheral {0} is not connected")]
    NotConnected(BleIdentity),

    #[error("Operation on the peripheral did not complete within {0:?}")]
    Timeout(Duration),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Accessory configuration is {actual} bytes, expected at least {expected}")]
    TooShort { expected: usize, actual: usize },

    #[error("Accessory configuration has unsupported spec version {major}.{minor}")]
    UnsupportedVersion { major: u16, minor: u16 },

    #[error("Notification is empty")]
    EmptyNotification,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UwbError {
    #[error("Local UWB session scope is unavailable: {0}")]
    ScopeUnavailable(String),

    #[error("Acquiring the local UWB session scope did not complete within {0:?}")]
    ScopeTimeout(Duration),

    #[error("Failed to open the ranging session: {0}")]
    RangingUnavailable(String),
}

#[derive(Error, Debug)]
pub enum PairingError {
    #[error("Malformed accessory configuration: {source}")]
    MalformedConfig { #[from] source: CodecError },

    #[error("Failed to write the ranging configuration: {source}")]
    TransportWriteFailed { source: DeviceError },

    #[error("Failed to acquire the local UWB session scope: {source}")]
    LocalScopeAcquisitionFailed { source: UwbError },

    #[error("Failed to start ranging: {source}")]
    RangingUnavailable { source: UwbError },

    #[error("Session is not waiting for a configuration write")]
    NotConfiguring,
}
