pub(crate) const REGISTER_COMMAND_CODE: u8 = 0x01;
pub(crate) const AUTHENTICATE_COMMAND_CODE: u8 = 0x02;
pub(crate) const VERSION_COMMAND_CODE: u8 = 0x03;

pub(crate) const SW_NO_ERROR: u16 = 0x9000; // The command completed successfully without error.
pub(crate) const SW_WRONG_DATA: u16 = 0x6A80; // The request was rejected due to an invalid key handle.
pub(crate) const SW_CONDITIONS_NOT_SATISFIED: u16 = 0x6985; // The request was rejected due to test-of-user-presence being required.

pub(crate) const AUTH_ENFORCE: u8 = 0x03; // Enforce user presence and sign
pub(crate) const AUTH_FLAG_TUP: u8 = 0x01; // Test of user presence set

pub(crate) const REGISTER_RESERVED_BYTE: u8 = 0x05;
pub(crate) const PUBLIC_KEY_LEN: usize = 65;
pub(crate) const PARAMETER_LEN: usize = 32;
pub(crate) const MAX_KEY_HANDLE_LEN: usize = 255;
pub(crate) const AUTHENTICATE_PREFIX_LEN: usize = 5;

pub(crate) const EC_POINT_FORMAT_UNCOMPRESSED: u8 = 0x04;

pub(crate) const VERSION_STRING: &str = "U2F_V2";
