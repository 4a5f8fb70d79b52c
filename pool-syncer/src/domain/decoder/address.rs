//! Payment credential extraction from raw address bytes

use crate::core::DecodeError;

/// Header (1 byte) plus a 28-byte payment credential
const MIN_SHELLEY_LEN: usize = 29;
const CREDENTIAL_LEN: usize = 28;

/// Script hash of the payment credential, `None` for key-hash payment
/// credentials, Byron bootstrap addresses and reward addresses.
pub fn payment_script_hash(address_hex: &str) -> Result<Option<String>, DecodeError> {
    let bytes = hex::decode(address_hex).map_err(|e| DecodeError::InvalidAddress {
        address: address_hex.to_string(),
        reason: e.to_string(),
    })?;

    let header = *bytes.first().ok_or_else(|| DecodeError::InvalidAddress {
        address: address_hex.to_string(),
        reason: "empty address".to_string(),
    })?;

    let address_type = header >> 4;
    // Types 0-7 carry a payment credential; odd types use a script hash
    if address_type > 7 || address_type % 2 == 0 {
        return Ok(None);
    }

    if bytes.len() < MIN_SHELLEY_LEN {
        return Err(DecodeError::InvalidAddress {
            address: address_hex.to_string(),
            reason: format!("{} bytes is too short for a payment credential", bytes.len()),
        });
    }

    Ok(Some(hex::encode(&bytes[1..1 + CREDENTIAL_LEN])))
}
