//! Log → transcript reconciliation
//!
//! Both modes are idempotent: feeding their output back in yields the same
//! transcript.

use super::types::{fallback_id, LogEntry, Message, RawEntry, Role};
use std::collections::HashMap;
use tracing::debug;

/// Order a role-tagged log by sequence number.
///
/// Missing ids get the synthetic `msg-{seq}`. Entries sharing an id collapse
/// into the latest arrival. Ties on `seq` keep arrival order.
pub fn reconcile(log: Vec<Message>) -> Vec<Message> {
    let mut messages: Vec<Message> = Vec::with_capacity(log.len());
    let mut positions: HashMap<String, usize> = HashMap::new();

    for mut message in log {
        if message.id.is_empty() {
            message.id = fallback_id(message.seq);
        }
        match positions.get(&message.id) {
            Some(&index) => messages[index] = message,
            None => {
                positions.insert(message.id.clone(), messages.len());
                messages.push(message);
            }
        }
    }

    messages.sort_by_key(|m| m.seq);
    messages
}

/// Reconcile a backend session log.
pub fn reconcile_log(entries: Vec<LogEntry>) -> Vec<Message> {
    reconcile(entries.into_iter().map(Message::from).collect())
}

/// Pair legacy entries into user/assistant turns.
///
/// Scans in order, holding the most recent unpaired user turn:
/// - a user entry becomes (or replaces) the held turn
/// - an assistant entry completes the held turn; without one it is skipped
/// - an entry with no recognizable role completes the held turn if there is
///   one, otherwise it becomes the held turn
///
/// A trailing unpaired user turn is dropped. Pair `n` (zero-based) yields ids
/// `pair-{n}-user` / `pair-{n}-assistant` with seq `2n+1` / `2n+2`.
pub fn reconcile_paired(entries: &[RawEntry]) -> Vec<Message> {
    let mut messages = Vec::new();
    let mut held_user: Option<String> = None;
    let mut pairs: i64 = 0;

    for entry in entries {
        let turn = entry.parse();
        match (turn.role, held_user.take()) {
            (Some(Role::User), previous) => {
                if previous.is_some() {
                    debug!("Replacing unanswered user turn in legacy log");
                }
                held_user = Some(turn.content);
            }
            (Some(Role::Assistant) | None, Some(user)) => {
                messages.push(Message::new(
                    format!("pair-{}-user", pairs),
                    Role::User,
                    user,
                    2 * pairs + 1,
                ));
                messages.push(Message::new(
                    format!("pair-{}-assistant", pairs),
                    Role::Assistant,
                    turn.content,
                    2 * pairs + 2,
                ));
                pairs += 1;
            }
            (Some(Role::Assistant), None) => {
                debug!("Skipping assistant turn without a preceding user turn");
            }
            (None, None) => held_user = Some(turn.content),
        }
    }

    if held_user.is_some() {
        debug!("Dropping trailing unpaired user turn");
    }
    messages
}

/// Re-encode a reconciled transcript as legacy entries
pub fn to_raw_entries(messages: &[Message]) -> Vec<RawEntry> {
    messages.iter().map(RawEntry::from).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(seq: i64, role: Role) -> Message {
        Message::new(format!("m{}", seq), role, format!("c{}", seq), seq)
    }

    fn seqs(messages: &[Message]) -> Vec<i64> {
        messages.iter().map(|m| m.seq).collect()
    }

    #[test]
    fn test_reconcile_orders_every_permutation() {
        let base = [msg(1, Role::User), msg(3, Role::Assistant), msg(2, Role::User)];
        let orders = [
            [0, 1, 2],
            [0, 2, 1],
            [1, 0, 2],
            [1, 2, 0],
            [2, 0, 1],
            [2, 1, 0],
        ];
        for order in orders {
            let log: Vec<Message> = order.iter().map(|&i| base[i].clone()).collect();
            assert_eq!(seqs(&reconcile(log)), vec![1, 2, 3], "{:?}", order);
        }
    }

    #[test]
    fn test_reconcile_fills_ids_and_dedupes() {
        let mut first = msg(1, Role::User);
        first.id.clear();
        let stale = Message::new("a", Role::Assistant, "partial", 2);
        let fresh = Message::new("a", Role::Assistant, "complete", 2);

        let out = reconcile(vec![stale, first, fresh]);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].id, "msg-1");
        assert_eq!(out[1].content, "complete");
    }

    #[test]
    fn test_reconcile_is_idempotent() {
        let once = reconcile(vec![msg(5, Role::Assistant), msg(4, Role::User)]);
        assert_eq!(reconcile(once.clone()), once);
    }

    #[test]
    fn test_reconcile_log_tags_roles() {
        let entries: Vec<LogEntry> = serde_json::from_str(
            r#"[
                {"id":"b","seq_no":2,"message_type":"AI","message_payload":"hello"},
                {"id":"a","seq_no":1,"message_type":"human","message_payload":"hi"}
            ]"#,
        )
        .unwrap();
        let out = reconcile_log(entries);
        assert_eq!(out[0].role, Role::User);
        assert_eq!(out[1].role, Role::Assistant);
        assert_eq!(out[1].content, "hello");
    }

    #[test]
    fn test_paired_drops_trailing_user_turn() {
        let entries = vec![
            RawEntry::new(r#"{"user":"hi"}"#),
            RawEntry::new(r#"{"assistant":"hello"}"#),
            RawEntry::new(r#"{"user":"bye"}"#),
        ];
        let out = reconcile_paired(&entries);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].role, Role::User);
        assert_eq!(out[0].content, "hi");
        assert_eq!(out[1].role, Role::Assistant);
        assert_eq!(out[1].content, "hello");
        assert!(out.iter().all(|m| m.content != "bye"));
    }

    #[test]
    fn test_paired_emits_two_complete_pairs() {
        let entries = vec![
            RawEntry::new(r#"{"user":"q1"}"#),
            RawEntry::new(r#"{"assistant":"a1"}"#),
            RawEntry::new(r#"{"role":"user","content":"q2"}"#),
            RawEntry::new(r#"{"role":"ai","content":"a2"}"#),
            RawEntry::new(r#"{"user":"bye"}"#),
        ];
        let out = reconcile_paired(&entries);
        let ids: Vec<&str> = out.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(
            ids,
            vec!["pair-0-user", "pair-0-assistant", "pair-1-user", "pair-1-assistant"]
        );
        assert_eq!(seqs(&out), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_paired_malformed_entries_degrade_to_text() {
        let entries = vec![
            RawEntry::new("plain question"),
            RawEntry::new("{not json"),
            RawEntry::new(r#"{"assistant":"orphan"}"#),
        ];
        let out = reconcile_paired(&entries);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].content, "plain question");
        assert_eq!(out[1].role, Role::Assistant);
        assert_eq!(out[1].content, "{not json");
    }

    #[test]
    fn test_paired_user_turn_replaces_unanswered_one() {
        let entries = vec![
            RawEntry::new(r#"{"user":"first"}"#),
            RawEntry::new(r#"{"user":"second"}"#),
            RawEntry::new(r#"{"assistant":"answer"}"#),
        ];
        let out = reconcile_paired(&entries);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].content, "second");
    }

    #[test]
    fn test_paired_is_idempotent() {
        let entries = vec![
            RawEntry::new(r#"{"user":"hi"}"#),
            RawEntry::new("hello there"),
            RawEntry::new(r#"{"user":"more"}"#),
            RawEntry::new(r#"{"assistant":"sure"}"#),
        ];
        let once = reconcile_paired(&entries);
        let twice = reconcile_paired(&to_raw_entries(&once));
        assert_eq!(once, twice);
    }
}
