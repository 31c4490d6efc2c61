//! Id minting helpers

use crate::error::WorkflowError;
use bech32::Bech32m;
use uuid7::uuid7;

// construct a unique time-ordered id then encode using bech32
pub fn new_uuid_to_bech32(hrp: &str) -> Result<String, WorkflowError> {
    let hrp = bech32::Hrp::parse(hrp).map_err(|e| WorkflowError::Codec(e.to_string()))?;
    let encode = bech32::encode::<Bech32m>(hrp, uuid7().as_bytes())
        .map_err(|e| WorkflowError::Codec(e.to_string()))?;
    Ok(encode)
}

pub fn new_campaign_id() -> Result<String, WorkflowError> {
    new_uuid_to_bech32("cmp_")
}

pub fn new_application_id() -> Result<String, WorkflowError> {
    new_uuid_to_bech32("app_")
}

pub fn new_submission_id() -> Result<String, WorkflowError> {
    new_uuid_to_bech32("sub_")
}
