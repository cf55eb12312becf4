use uuid::Uuid;

/**
 * How often (milliseconds) to check whether a connected peripheral is still connected.
 */
pub const CONNECTION_POLL_DELAY: u64 = 500;

/**
 * How long (milliseconds) checking if the peripheral is still connected may take
 */
pub const IS_CONNECTED_DEADLINE: u64 = 2000;

/**
 * The UUID of the Bluetooth BLE service (Nordic UART) exposed by the ranging accessory
 */
pub const UART_SERVICE: &str = "6e400001-b5a3-f393-e0a9-e50e24dcca9e";

/**
 * The UUID of the characteristic that commands are written to.
 */
pub const UART_RX_CHARACTERISTIC: &str = "6e400002-b5a3-f393-e0a9-e50e24dcca9e";

/**
 * The UUID of the characteristic the accessory sends notifications on.
 */
pub const UART_TX_CHARACTERISTIC: &str = "6e400003-b5a3-f393-e0a9-e50e24dcca9e";

/**
 * Asks the accessory to report its configuration data.
 */
pub const COMMAND_INITIALIZE: u8 = 0xA5;

/**
 * Carries a PhoneConfig and asks the accessory to start ranging.
 */
pub const COMMAND_CONFIGURE_AND_START: u8 = 0x0B;

pub const NOTIFICATION_ACCESSORY_CONFIG: u8 = 0x01;
pub const NOTIFICATION_UWB_DID_START: u8 = 0x02;
pub const NOTIFICATION_UWB_DID_STOP: u8 = 0x03;

/**
 * Protocol version spoken with the accessory firmware. Accessories reporting another major
 * version are rejected.
 */
pub const SPEC_VERSION_MAJOR: u16 = 1;
pub const SPEC_VERSION_MINOR: u16 = 0;

/**
 * Key material the firmware expects for the vendor id and STS IV.
 */
pub const SESSION_KEY: [u8; 8] = [0x08, 0x07, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06];

pub fn make_uart_service_uuid() -> Uuid {
    Uuid::from_u128(0x6e400001_b5a3_f393_e0a9_e50e24dcca9e)
}

pub fn make_uart_rx_uuid() -> Uuid {
    Uuid::from_u128(0x6e400002_b5a3_f393_e0a9_e50e24dcca9e)
}

pub fn make_uart_tx_uuid() -> Uuid {
    Uuid::from_u128(0x6e400003_b5a3_f393_e0a9_e50e24dcca9e)
}
