//! Domain identifiers (strongly-typed IDs).
//!
//! ULID ベースの ID を Phantom type パターンで型付けします。
//! - **時刻でソート可能**: outbox の取り出し順序にそのまま使える
//! - **分散生成可能**: ingress インスタンス間の調整が不要
//!
//! `Id<T>` の `T` は実行時には存在しないマーカー型で、
//! `TaskId` と `OutboxId` を取り違えるとコンパイルエラーになります。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;
use ulid::Ulid;

/// Marker trait for every ID flavour.
pub trait IdMarker: Send + Sync + 'static {
    /// Display で使うプレフィックス（例: "task-"）
    fn prefix() -> &'static str;
}

/// Generic ULID-backed identifier.
///
/// Serializes as the bare ULID string so the wire format stays `"taskId": "01H..."`.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id<T: IdMarker> {
    ulid: Ulid,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _marker: PhantomData,
        }
    }

    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }

    /// String form used for storage keys, lock keys and message keys (no prefix).
    pub fn as_key(&self) -> String {
        self.ulid.to_string()
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

/// Error returned when an ID string is not a valid ULID.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid id '{0}'")]
pub struct ParseIdError(pub String);

impl<T: IdMarker> FromStr for Id<T> {
    type Err = ParseIdError;

    /// Accepts both the bare ULID and the prefixed display form.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.strip_prefix(T::prefix()).unwrap_or(s);
        Ulid::from_string(raw)
            .map(Self::from_ulid)
            .map_err(|_| ParseIdError(s.to_string()))
    }
}

// ========================================
// マーカー型の定義
// ========================================

/// Task のマーカー型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Task {}

impl IdMarker for Task {
    fn prefix() -> &'static str {
        "task-"
    }
}

/// Outbox エントリのマーカー型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Outbox {}

impl IdMarker for Outbox {
    fn prefix() -> &'static str {
        "outbox-"
    }
}

/// Identifier of a Task (addressing and locking unit).
pub type TaskId = Id<Task>;

/// Identifier of an outbox row.
pub type OutboxId = Id<Outbox>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_prefix_but_key_does_not() {
        let ulid = Ulid::new();
        let task = TaskId::from_ulid(ulid);

        assert_eq!(task.to_string(), format!("task-{ulid}"));
        assert_eq!(task.as_key(), ulid.to_string());
    }

    #[test]
    fn parses_bare_and_prefixed_forms() {
        let task = TaskId::from_ulid(Ulid::new());

        let bare: TaskId = task.as_key().parse().unwrap();
        let prefixed: TaskId = task.to_string().parse().unwrap();

        assert_eq!(bare, task);
        assert_eq!(prefixed, task);
        assert!("not-a-ulid".parse::<TaskId>().is_err());
    }

    #[test]
    fn serializes_as_plain_string() {
        let task = TaskId::from_ulid(Ulid::new());

        let json = serde_json::to_value(task).unwrap();
        assert_eq!(json, serde_json::Value::String(task.as_key()));

        let back: TaskId = serde_json::from_value(json).unwrap();
        assert_eq!(back, task);
    }

    #[test]
    fn ulid_ids_are_sortable() {
        // ULID は時刻ベースなので、生成順序でソート可能
        let id1 = OutboxId::from_ulid(Ulid::new());
        std::thread::sleep(std::time::Duration::from_millis(2));
        let id2 = OutboxId::from_ulid(Ulid::new());

        assert!(id1 < id2);
    }
}
