//! Kanban board back-end: workspaces, members and densely ordered tasks.
//!
//! ## Overview
//!
//! Every task lives in exactly one (workspace, column) partition and carries
//! an `order`. Within a partition the orders are always exactly
//! `0..count`: inserts append at the tail, deletes close the gap and moves
//! shift the affected siblings by one, all inside a single SQLite
//! transaction that is verified before it commits. Connected clients get a
//! WebSocket hint after each committed change and refetch what they need.
//!
//! ## Module Map
//!
//! ```text
//! ┌──────────┐   HTTP   ┌──────────────────────────────────────────────────┐
//! │  Client  │ ───────> │  server.rs  (axum Router, ServerConfig)          │
//! │          │ <─────── │    └─ api.rs  (route handlers, AppState)         │
//! └──────────┘ WebSocket│         │  auth.rs  (Caller, access checks)      │
//!       ^               │         │                                        │
//!       │               │         │ DbHandle::call() on the blocking pool  │
//!       │               │         v                                        │
//!       │               │  db.rs  (BoardDb: users, workspaces, tasks)      │
//!       │               │         │                                        │
//!       │               │         │ plan_move() / plan_delete() → Shifts   │
//!       │               │         v                                        │
//!       │               │  ordering.rs  (pure index arithmetic)            │
//!       │               └──────────────────────────────────────────────────┘
//!       │                         │ broadcast_message()
//!       └──────── ws.rs ──────────┘ (per-workspace fan-out)
//! ```
//!
//! ## Supporting Modules
//!
//! | Module     | Responsibility                                            |
//! |------------|-----------------------------------------------------------|
//! | `models`   | Shared types: `Task`, `Column`, `Workspace`, `Member`     |
//! | `ordering` | `IndexPolicy`, move/delete plans, density check           |
//! | `auth`     | `X-User-Id` extractor and per-workspace authorization     |
//! | `ws`       | `WsMessage` enum + `broadcast_message()` helper           |
//!
//! ## Typical Request Flow (move a task)
//!
//! 1. `PATCH /api/tasks/{id}/move` → `api::move_task()`
//! 2. The caller is resolved from `X-User-Id` and must belong to the task's
//!    workspace.
//! 3. `BoardDb::move_task()` opens a transaction, checks `source_column`
//!    against the stored column, resolves `new_index` under the configured
//!    `IndexPolicy` and applies the planned shifts as set-based `UPDATE`s.
//! 4. Both touched partitions are re-read and checked for density; any gap
//!    or duplicate rolls the whole move back as a `ConsistencyFault`.
//! 5. After commit a `TaskMoved` message goes to every other socket
//!    subscribed to the workspace.

pub mod api;
pub mod auth;
pub mod db;
pub mod models;
pub mod ordering;
pub mod server;
pub mod ws;
