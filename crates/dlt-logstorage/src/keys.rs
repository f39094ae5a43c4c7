//! Textual filter keys.
//!
//! A filter key is the compact form `<ecu>:<apid>:<ctid>` where an empty
//! segment stands for a wildcard. Keys are built from the comma lists in a
//! filter section (cartesian product of APIDs and CTIDs) and parsed back
//! when a stored key has to be resolved into its identifier parts.

use crate::error::{Result, StorageError};
use crate::types::{ID_LEN, StorageId, WILDCARD};

/// Upper bound of key variants a single message can match:
/// `ecu::`, `:apid:`, `::ctid`, `:apid:ctid`, `ecu:apid:ctid`,
/// `ecu:apid:`, `ecu::ctid`.
pub const MAX_KEY_VARIANTS: usize = 7;

/// Identifier parts recovered from a textual key. `None` marks a
/// wildcard segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ParsedKey {
    /// ECU id segment.
    pub ecu: Option<StorageId>,
    /// Application id segment.
    pub apid: Option<StorageId>,
    /// Context id segment.
    pub ctid: Option<StorageId>,
}

/// Splits a comma list into trimmed, truncated tokens. A `.*` token stays
/// a wildcard marker; identifiers are cut to [`ID_LEN`] bytes the way the
/// producer registration does.
fn id_tokens(list: &str) -> Vec<Option<StorageId>> {
    list.split(',')
        .map(str::trim)
        .filter(|tok| !tok.is_empty())
        .map(|tok| {
            if tok == WILDCARD {
                None
            } else {
                Some(StorageId::new(tok))
            }
        })
        .collect()
}

fn render(ecu: Option<&StorageId>, apid: Option<&StorageId>, ctid: Option<&StorageId>) -> String {
    format!(
        "{}:{}:{}",
        ecu.map_or("", StorageId::as_str),
        apid.map_or("", StorageId::as_str),
        ctid.map_or("", StorageId::as_str)
    )
}

/// Builds all keys for one filter section.
///
/// Every combination of the APID and CTID comma lists yields one key; a
/// wildcard token leaves its segment empty. When both lists are pure
/// wildcards the filter is only valid with an ECU id and collapses to the
/// single key `ecu::`.
///
/// # Errors
///
/// Returns [`StorageError::ConfigInvalid`] for the forbidden combination
/// of wildcard APIDs and wildcard CTIDs without an ECU id, or when a list
/// is empty.
pub fn build_keys(apids: &str, ctids: &str, ecu: Option<&StorageId>) -> Result<Vec<String>> {
    let apid_toks = id_tokens(apids);
    let ctid_toks = id_tokens(ctids);

    if apid_toks.is_empty() || ctid_toks.is_empty() {
        return Err(StorageError::ConfigInvalid(
            "empty application or context id list".into(),
        ));
    }

    let all_wild = |toks: &[Option<StorageId>]| toks.iter().all(Option::is_none);

    if all_wild(&apid_toks) && all_wild(&ctid_toks) {
        // Only an ECU-scoped filter may match everything.
        return match ecu {
            Some(id) => Ok(vec![render(Some(id), None, None)]),
            None => Err(StorageError::ConfigInvalid(
                "wildcard apid and ctid require an EcuID".into(),
            )),
        };
    }

    let mut keys = Vec::with_capacity(apid_toks.len() * ctid_toks.len());
    for apid in &apid_toks {
        for ctid in &ctid_toks {
            let key = render(ecu, apid.as_ref(), ctid.as_ref());
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
    }
    Ok(keys)
}

/// Parses a textual key back into its identifier parts.
///
/// Both the 3-segment form (`ecu:apid:ctid`) and the legacy 2-segment
/// form (`apid:ctid`) are accepted; empty segments come back as `None`.
///
/// # Errors
///
/// Returns [`StorageError::InvalidKey`] when the key holds no colon, has
/// more than three segments, or a segment exceeds [`ID_LEN`] bytes.
pub fn split_key(key: &str) -> Result<ParsedKey> {
    let parts: Vec<&str> = key.split(':').collect();
    let (ecu, apid, ctid) = match parts.as_slice() {
        [apid, ctid] => (None, *apid, *ctid),
        [ecu, apid, ctid] => (Some(*ecu), *apid, *ctid),
        _ => return Err(StorageError::InvalidKey(key.to_string())),
    };

    let segment = |part: &str| -> Result<Option<StorageId>> {
        if part.is_empty() {
            Ok(None)
        } else if part.len() > ID_LEN {
            Err(StorageError::InvalidKey(key.to_string()))
        } else {
            Ok(Some(StorageId::new(part)))
        }
    };

    Ok(ParsedKey {
        ecu: match ecu {
            Some(part) => segment(part)?,
            None => None,
        },
        apid: segment(apid)?,
        ctid: segment(ctid)?,
    })
}

/// Builds the lookup-key variants for one incoming message, most generic
/// first. A message without APID/CTID (non-verbose) only gets the ECU
/// wildcard variant.
#[must_use]
pub fn candidate_keys(
    ecu: Option<&StorageId>,
    apid: Option<&StorageId>,
    ctid: Option<&StorageId>,
) -> Vec<String> {
    let mut keys = Vec::with_capacity(MAX_KEY_VARIANTS);
    let mut push = |key: String| {
        if !keys.contains(&key) {
            keys.push(key);
        }
    };

    if let Some(ecu) = ecu {
        push(render(Some(ecu), None, None));
    }
    if let (Some(apid), Some(ctid)) = (apid, ctid) {
        push(render(None, Some(apid), None));
        push(render(None, None, Some(ctid)));
        push(render(None, Some(apid), Some(ctid)));
        if let Some(ecu) = ecu {
            push(render(Some(ecu), Some(apid), Some(ctid)));
            push(render(Some(ecu), Some(apid), None));
            push(render(Some(ecu), None, Some(ctid)));
        }
    }
    keys
}
