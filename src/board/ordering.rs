//! Index arithmetic for dense per-column ordering.
//!
//! Every (workspace, column) partition holds orders `0..count` with no gaps
//! or duplicates. The functions here never touch storage: they turn an
//! insert, delete or move into a list of [`Shift`]s, each of which the store
//! applies as one set-based conditional `UPDATE` inside a transaction.

use serde::{Deserialize, Serialize};

use super::models::Column;
use crate::errors::{BoardError, BoardResult};

/// What to do with a move index outside `0..=others`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexPolicy {
    /// Refuse the move with a validation error.
    #[default]
    Reject,
    /// Pin the index to the nearest valid slot.
    Clamp,
}

impl std::fmt::Display for IndexPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IndexPolicy::Reject => write!(f, "reject"),
            IndexPolicy::Clamp => write!(f, "clamp"),
        }
    }
}

impl std::str::FromStr for IndexPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "reject" => Ok(IndexPolicy::Reject),
            "clamp" => Ok(IndexPolicy::Clamp),
            _ => Err(format!("Invalid index policy: {} (expected reject or clamp)", s)),
        }
    }
}

/// A task's coordinate inside its workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub column: Column,
    pub order: i64,
}

/// Add `delta` to the order of every sibling in `column` whose order lies in
/// `from..=to` (`to == None` means unbounded). The moving task is excluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shift {
    pub column: Column,
    pub from: i64,
    pub to: Option<i64>,
    pub delta: i64,
}

impl Shift {
    pub fn covers(&self, order: i64) -> bool {
        order >= self.from && self.to.is_none_or(|to| order <= to)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MovePlan {
    pub shifts: Vec<Shift>,
    pub target: Placement,
}

impl MovePlan {
    pub fn is_noop(&self, current: Placement) -> bool {
        self.shifts.is_empty() && self.target == current
    }

    /// Columns whose orders change and must be re-verified.
    pub fn touched_columns(&self, current: Placement) -> Vec<Column> {
        let mut columns = vec![current.column];
        if self.target.column != current.column {
            columns.push(self.target.column);
        }
        columns
    }
}

/// Order assigned to a task appended to a column whose highest order is `max`.
pub fn append_order(max: Option<i64>) -> i64 {
    max.map_or(0, |m| m + 1)
}

/// Validate or clamp a requested move index.
///
/// `others` is the number of tasks in the destination partition other than
/// the moving one, so `others` itself is the "append at the end" slot.
/// A negative index is malformed input and is refused under either policy;
/// `Clamp` only pins indices past the end.
pub fn resolve_index(requested: i64, others: i64, policy: IndexPolicy) -> BoardResult<i64> {
    if requested < 0 {
        return Err(BoardError::Validation(format!(
            "new_index must not be negative (got {})",
            requested
        )));
    }
    if requested <= others {
        return Ok(requested);
    }
    match policy {
        IndexPolicy::Clamp => Ok(others),
        IndexPolicy::Reject => Err(BoardError::Validation(format!(
            "new_index {} is out of range 0..={}",
            requested, others
        ))),
    }
}

/// Shift that closes the gap left by removing the task at `removed`.
pub fn plan_delete(removed: Placement) -> Shift {
    Shift {
        column: removed.column,
        from: removed.order + 1,
        to: None,
        delta: -1,
    }
}

/// Plan a move of the task at `current` to `index` in `destination`.
/// `index` must already have gone through [`resolve_index`].
pub fn plan_move(current: Placement, destination: Column, index: i64) -> MovePlan {
    let target = Placement {
        column: destination,
        order: index,
    };

    if current.column != destination {
        let shifts = vec![
            plan_delete(current),
            Shift {
                column: destination,
                from: index,
                to: None,
                delta: 1,
            },
        ];
        return MovePlan { shifts, target };
    }

    let shifts = match index.cmp(&current.order) {
        std::cmp::Ordering::Equal => Vec::new(),
        // Moving up: tasks in [index, old) slide down one slot.
        std::cmp::Ordering::Less => vec![Shift {
            column: destination,
            from: index,
            to: Some(current.order - 1),
            delta: 1,
        }],
        // Moving down: tasks in (old, index] slide up one slot.
        std::cmp::Ordering::Greater => vec![Shift {
            column: destination,
            from: current.order + 1,
            to: Some(index),
            delta: -1,
        }],
    };
    MovePlan { shifts, target }
}

/// Check that `orders` (sorted ascending) is exactly `0..len`.
pub fn check_dense(orders: &[i64]) -> Result<(), String> {
    for (expected, actual) in orders.iter().enumerate() {
        if *actual != expected as i64 {
            return Err(format!(
                "expected orders 0..{}, found {:?}",
                orders.len(),
                orders
            ));
        }
    }
    Ok(())
}
