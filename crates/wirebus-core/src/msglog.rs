//! Per-message logging gate.
//!
//! Message traffic logs are useful in development and noisy in production;
//! the gate picks between showing everything, muting everything, or
//! filtering by a black or white list of message ids. The recv/send
//! formatters keep the `#proto.recv(peer)@sesid len: N Type | body` shape
//! operators grep for.

use std::any::Any;
use std::collections::HashSet;
use std::sync::{LazyLock, RwLock};

use tracing::debug;

use crate::error::{RegistryError, Result};
use crate::meta::{
    message_size, message_to_string, message_type_name, meta_by_full_name, meta_by_msg,
    visit_metas,
};

/// Process-wide log mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsgLogMode {
    /// Every message logs.
    ShowAll,
    /// Nothing logs.
    Mute,
    /// Everything logs except black-listed ids.
    BlackList,
    /// Only white-listed ids log.
    WhiteList,
}

/// Per-message rule applied through [`set_msg_log_rule`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsgLogRule {
    /// Remove the message from both lists.
    None,
    BlackList,
    WhiteList,
}

struct MsgLogState {
    mode: MsgLogMode,
    black: HashSet<u32>,
    white: HashSet<u32>,
}

static STATE: LazyLock<RwLock<MsgLogState>> = LazyLock::new(|| {
    RwLock::new(MsgLogState {
        mode: MsgLogMode::BlackList,
        black: HashSet::new(),
        white: HashSet::new(),
    })
});

pub fn set_msg_log_mode(mode: MsgLogMode) {
    STATE.write().unwrap().mode = mode;
}

pub fn msg_log_mode() -> MsgLogMode {
    STATE.read().unwrap().mode
}

/// Applies a rule to one message by full name.
pub fn set_msg_log_rule(full_name: &str, rule: MsgLogRule) -> Result<()> {
    let meta = meta_by_full_name(full_name).ok_or_else(|| RegistryError::UnknownName {
        full_name: full_name.to_string(),
    })?;

    let mut state = STATE.write().unwrap();
    match rule {
        MsgLogRule::BlackList => {
            state.black.insert(meta.id());
        }
        MsgLogRule::WhiteList => {
            state.white.insert(meta.id());
        }
        MsgLogRule::None => {
            state.black.remove(&meta.id());
            state.white.remove(&meta.id());
        }
    }

    Ok(())
}

/// Black-lists every registered message whose full name matches `name_rule`.
/// Returns how many matched.
pub fn block_message_log(name_rule: &str) -> Result<usize> {
    let mut ids = Vec::new();
    visit_metas(name_rule, |meta| {
        ids.push(meta.id());
        true
    })?;

    let mut state = STATE.write().unwrap();
    let count = ids.len();
    state.black.extend(ids);
    Ok(count)
}

/// Removes matching messages from the black list. Returns how many matched.
pub fn remove_blocked_message(name_rule: &str) -> Result<usize> {
    let mut ids = Vec::new();
    visit_metas(name_rule, |meta| {
        ids.push(meta.id());
        true
    })?;

    let mut state = STATE.write().unwrap();
    let count = ids.len();
    for id in ids {
        state.black.remove(&id);
    }
    Ok(count)
}

/// Whether traffic logging is allowed for this message id under the current
/// mode.
pub fn is_msg_log_valid(msg_id: u32) -> bool {
    let state = STATE.read().unwrap();
    match state.mode {
        MsgLogMode::ShowAll => true,
        MsgLogMode::Mute => false,
        MsgLogMode::BlackList => !state.black.contains(&msg_id),
        MsgLogMode::WhiteList => state.white.contains(&msg_id),
    }
}

// ----------------------------------------------------------------------------
// Traffic Log Formatters
// ----------------------------------------------------------------------------

/// Logs one inbound message when the gate allows it.
pub fn write_recv_logger(
    protocol: &str,
    peer_name: &str,
    ses_id: i64,
    msg: &(dyn Any + Send + Sync),
) {
    let msg_id = meta_by_msg(msg).map(|m| m.id()).unwrap_or(0);
    if !is_msg_log_valid(msg_id) {
        return;
    }

    debug!(
        "#{}.recv({})@{} len: {} {} | {}",
        protocol,
        peer_name,
        ses_id,
        message_size(msg),
        message_type_name(msg),
        message_to_string(msg)
    );
}

/// Logs one outbound message when the gate allows it.
pub fn write_send_logger(
    protocol: &str,
    peer_name: &str,
    ses_id: i64,
    msg: &(dyn Any + Send + Sync),
) {
    let msg_id = meta_by_msg(msg).map(|m| m.id()).unwrap_or(0);
    if !is_msg_log_valid(msg_id) {
        return;
    }

    debug!(
        "#{}.send({})@{} len: {} {} | {}",
        protocol,
        peer_name,
        ses_id,
        message_size(msg),
        message_type_name(msg),
        message_to_string(msg)
    );
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::CodecKind;
    use crate::meta::register_message;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Default, Serialize, Deserialize)]
    struct LogProbe;

    #[derive(Debug, Default, Serialize, Deserialize)]
    struct LogProbeNoisy;

    // Global gate state is process-wide; one test walks all modes to avoid
    // cross-test interference.
    #[test]
    fn gate_modes_and_rules() {
        register_message::<LogProbe>("logtest.LogProbe", 0x6401, CodecKind::Json);
        register_message::<LogProbeNoisy>("logtest.LogProbeNoisy", 0x6402, CodecKind::Json);

        set_msg_log_mode(MsgLogMode::ShowAll);
        assert!(is_msg_log_valid(0x6401));
        assert!(is_msg_log_valid(0x9999));

        set_msg_log_mode(MsgLogMode::Mute);
        assert!(!is_msg_log_valid(0x6401));

        set_msg_log_mode(MsgLogMode::BlackList);
        assert!(is_msg_log_valid(0x6401));
        set_msg_log_rule("logtest.LogProbe", MsgLogRule::BlackList).unwrap();
        assert!(!is_msg_log_valid(0x6401));
        assert!(is_msg_log_valid(0x6402));
        set_msg_log_rule("logtest.LogProbe", MsgLogRule::None).unwrap();
        assert!(is_msg_log_valid(0x6401));

        set_msg_log_mode(MsgLogMode::WhiteList);
        assert!(!is_msg_log_valid(0x6401));
        set_msg_log_rule("logtest.LogProbe", MsgLogRule::WhiteList).unwrap();
        assert!(is_msg_log_valid(0x6401));
        assert!(!is_msg_log_valid(0x6402));

        // bulk block by rule
        set_msg_log_mode(MsgLogMode::BlackList);
        let matched = block_message_log("^logtest\\.").unwrap();
        assert_eq!(matched, 2);
        assert!(!is_msg_log_valid(0x6401));
        assert!(!is_msg_log_valid(0x6402));

        let removed = remove_blocked_message("^logtest\\.").unwrap();
        assert_eq!(removed, 2);
        assert!(is_msg_log_valid(0x6401));

        assert!(set_msg_log_rule("logtest.Missing", MsgLogRule::BlackList).is_err());

        set_msg_log_mode(MsgLogMode::ShowAll);
    }
}
