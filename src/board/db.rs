use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::models::*;
use super::ordering::{self, IndexPolicy, Placement, Shift};
use crate::errors::{BoardError, BoardResult};

/// How long a writer waits on a lock held by another connection before the
/// operation fails with a transient error.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const TASK_COLUMNS: &str = "id, workspace_id, title, description, priority, due_date, column_name, position, assignee_id, assignee_name, comments_count, created_by, created_at, updated_at";

/// Async-safe handle to the board database.
///
/// Wraps `BoardDb` behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`, preventing synchronous SQLite
/// I/O from tying up async worker threads. Because the closure runs to
/// completion even if the awaiting request is dropped, a cancelled request
/// never leaves a transaction half-applied.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<BoardDb>>,
}

impl DbHandle {
    pub fn new(db: BoardDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> BoardResult<R>
    where
        F: FnOnce(&BoardDb) -> BoardResult<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db.lock().map_err(|_| BoardError::LockPoisoned)?;
            f(&guard)
        })
        .await
        .map_err(|e| {
            if e.is_cancelled() {
                BoardError::Transient("database task was cancelled".into())
            } else {
                BoardError::Other(anyhow::anyhow!("database task panicked: {}", e))
            }
        })?
    }
}

/// The ordered task store.
pub struct BoardDb {
    conn: Connection,
    index_policy: IndexPolicy,
}

impl BoardDb {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> BoardResult<Self> {
        let conn = Connection::open(path)?;
        let db = Self {
            conn,
            index_policy: IndexPolicy::default(),
        };
        db.init()?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> BoardResult<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn,
            index_policy: IndexPolicy::default(),
        };
        db.init()?;
        Ok(db)
    }

    pub fn with_index_policy(mut self, policy: IndexPolicy) -> Self {
        self.index_policy = policy;
        self
    }

    pub fn index_policy(&self) -> IndexPolicy {
        self.index_policy
    }

    fn init(&self) -> BoardResult<()> {
        self.conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        self.conn.busy_timeout(BUSY_TIMEOUT)?;
        self.run_migrations()?;
        Ok(())
    }

    fn run_migrations(&self) -> BoardResult<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                email TEXT NOT NULL UNIQUE,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS workspaces (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                owner_id TEXT NOT NULL REFERENCES users(id),
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS workspace_members (
                workspace_id TEXT NOT NULL REFERENCES workspaces(id) ON DELETE CASCADE,
                user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                role TEXT NOT NULL DEFAULT 'member',
                joined_at TEXT NOT NULL,
                UNIQUE(workspace_id, user_id)
            );

            CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                workspace_id TEXT NOT NULL REFERENCES workspaces(id) ON DELETE CASCADE,
                title TEXT NOT NULL,
                description TEXT,
                priority TEXT NOT NULL DEFAULT 'medium',
                due_date TEXT,
                column_name TEXT NOT NULL DEFAULT 'todo',
                position INTEGER NOT NULL DEFAULT 0 CHECK (position >= 0),
                assignee_id TEXT,
                assignee_name TEXT,
                comments_count INTEGER NOT NULL DEFAULT 0,
                created_by TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_members_user ON workspace_members(user_id);
            CREATE INDEX IF NOT EXISTS idx_tasks_partition ON tasks(workspace_id, column_name, position);
            ",
        )?;
        Ok(())
    }

    // ── Users ─────────────────────────────────────────────────────────

    pub fn create_user(&self, name: &str, email: &str) -> BoardResult<User> {
        let name = required_text("name", name)?;
        let email = email.trim().to_lowercase();
        if !email.contains('@') {
            return Err(BoardError::Validation(format!("Invalid email: {}", email)));
        }
        if self.find_user_by_email(&email)?.is_some() {
            return Err(BoardError::Conflict(format!(
                "A user with email {} already exists",
                email
            )));
        }

        let user = User {
            id: Uuid::new_v4().to_string(),
            name,
            email,
            created_at: Utc::now(),
        };
        self.conn.execute(
            "INSERT INTO users (id, name, email, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![user.id, user.name, user.email, user.created_at],
        )?;
        info!(user_id = %user.id, "registered user");
        Ok(user)
    }

    pub fn get_user(&self, id: &str) -> BoardResult<Option<User>> {
        fetch_user(&self.conn, id)
    }

    pub fn find_user_by_email(&self, email: &str) -> BoardResult<Option<User>> {
        let user = self
            .conn
            .query_row(
                "SELECT id, name, email, created_at FROM users WHERE email = ?1",
                params![email.trim().to_lowercase()],
                user_from_row,
            )
            .optional()?;
        Ok(user)
    }

    // ── Workspaces ────────────────────────────────────────────────────

    /// Create a workspace whose owner is its sole member.
    pub fn create_workspace(&self, owner_id: &str, name: &str) -> BoardResult<Workspace> {
        let name = required_text("name", name)?;
        if fetch_user(&self.conn, owner_id)?.is_none() {
            return Err(BoardError::not_found("User", owner_id));
        }

        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        // Safety: DbHandle's Mutex already guarantees single-threaded access.
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO workspaces (id, name, owner_id, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![id, name, owner_id, now],
        )?;
        tx.execute(
            "INSERT INTO workspace_members (workspace_id, user_id, role, joined_at) VALUES (?1, ?2, 'owner', ?3)",
            params![id, owner_id, now],
        )?;
        tx.commit()?;
        info!(workspace_id = %id, owner_id, "created workspace");
        self.require_workspace(&id)
    }

    pub fn get_workspace(&self, id: &str) -> BoardResult<Option<Workspace>> {
        fetch_workspace(&self.conn, id)
    }

    fn require_workspace(&self, id: &str) -> BoardResult<Workspace> {
        fetch_workspace(&self.conn, id)?.ok_or_else(|| BoardError::not_found("Workspace", id))
    }

    /// Workspaces the user owns or belongs to, oldest first.
    pub fn list_workspaces_for(&self, user_id: &str) -> BoardResult<Vec<Workspace>> {
        let mut stmt = self.conn.prepare(
            "SELECT w.id FROM workspaces w
             JOIN workspace_members m ON m.workspace_id = w.id
             WHERE m.user_id = ?1
             ORDER BY w.created_at, w.id",
        )?;
        let ids = stmt
            .query_map(params![user_id], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        let mut workspaces = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(ws) = fetch_workspace(&self.conn, &id)? {
                workspaces.push(ws);
            }
        }
        Ok(workspaces)
    }

    pub fn rename_workspace(&self, id: &str, name: &str) -> BoardResult<Workspace> {
        let name = required_text("name", name)?;
        let count = self.conn.execute(
            "UPDATE workspaces SET name = ?1 WHERE id = ?2",
            params![name, id],
        )?;
        if count == 0 {
            return Err(BoardError::not_found("Workspace", id));
        }
        self.require_workspace(id)
    }

    /// Delete a workspace together with its members and tasks.
    pub fn delete_workspace(&self, id: &str) -> BoardResult<bool> {
        let count = self
            .conn
            .execute("DELETE FROM workspaces WHERE id = ?1", params![id])?;
        if count > 0 {
            info!(workspace_id = id, "deleted workspace and its tasks");
        }
        Ok(count > 0)
    }

    pub fn add_member(&self, workspace_id: &str, user_id: &str, role: Role) -> BoardResult<Workspace> {
        if role == Role::Owner {
            return Err(BoardError::Validation(
                "A workspace has exactly one owner; add members as admin or member".into(),
            ));
        }
        let workspace = self.require_workspace(workspace_id)?;
        if fetch_user(&self.conn, user_id)?.is_none() {
            return Err(BoardError::not_found("User", user_id));
        }
        if workspace.is_member(user_id) {
            return Err(BoardError::Conflict(format!(
                "User {} is already a member of workspace {}",
                user_id, workspace_id
            )));
        }

        self.conn.execute(
            "INSERT INTO workspace_members (workspace_id, user_id, role, joined_at) VALUES (?1, ?2, ?3, ?4)",
            params![workspace_id, user_id, role.as_str(), Utc::now()],
        )?;
        debug!(workspace_id, user_id, role = role.as_str(), "added member");
        self.require_workspace(workspace_id)
    }

    /// Remove a member and clear their task assignments in the workspace.
    pub fn remove_member(&self, workspace_id: &str, user_id: &str) -> BoardResult<Workspace> {
        let workspace = self.require_workspace(workspace_id)?;
        if workspace.owner_id == user_id {
            return Err(BoardError::Validation(
                "The workspace owner cannot be removed".into(),
            ));
        }
        if !workspace.is_member(user_id) {
            return Err(BoardError::not_found("Member", user_id));
        }

        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "DELETE FROM workspace_members WHERE workspace_id = ?1 AND user_id = ?2",
            params![workspace_id, user_id],
        )?;
        let unassigned = tx.execute(
            "UPDATE tasks SET assignee_id = NULL, assignee_name = NULL, updated_at = ?1
             WHERE workspace_id = ?2 AND assignee_id = ?3",
            params![Utc::now(), workspace_id, user_id],
        )?;
        tx.commit()?;
        debug!(workspace_id, user_id, unassigned, "removed member");
        self.require_workspace(workspace_id)
    }

    // ── Tasks ─────────────────────────────────────────────────────────

    /// Append a new task to the tail of its column.
    ///
    /// The max-order read and the insert share one transaction, so two
    /// concurrent inserts can never be assigned the same order.
    pub fn insert_task(&self, workspace_id: &str, created_by: &str, new: NewTask) -> BoardResult<Task> {
        let title = required_text("title", &new.title)?;

        let tx = self.conn.unchecked_transaction()?;
        if fetch_workspace_row(&tx, workspace_id)?.is_none() {
            return Err(BoardError::not_found("Workspace", workspace_id));
        }
        let assignee = resolve_assignee(&tx, workspace_id, new.assignee_id.as_deref())?;

        let max: Option<i64> = tx.query_row(
            "SELECT MAX(position) FROM tasks WHERE workspace_id = ?1 AND column_name = ?2",
            params![workspace_id, new.column.as_str()],
            |row| row.get(0),
        )?;
        let order = ordering::append_order(max);

        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        tx.execute(
            &format!("INSERT INTO tasks ({TASK_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 0, ?11, ?12, ?12)"),
            params![
                id,
                workspace_id,
                title,
                new.description,
                new.priority.as_str(),
                new.due_date,
                new.column.as_str(),
                order,
                assignee.as_ref().map(|a| a.id.as_str()),
                assignee.as_ref().map(|a| a.name.as_str()),
                created_by,
                now,
            ],
        )?;
        verify_partition(&tx, workspace_id, new.column)?;
        tx.commit()?;

        debug!(task_id = %id, workspace_id, column = %new.column, order, "inserted task");
        self.require_task(&id)
    }

    pub fn get_task(&self, id: &str) -> BoardResult<Option<Task>> {
        fetch_task(&self.conn, id)
    }

    fn require_task(&self, id: &str) -> BoardResult<Task> {
        fetch_task(&self.conn, id)?.ok_or_else(|| BoardError::not_found("Task", id))
    }

    /// Edit non-ordering fields. Column and order are only changed by moves.
    pub fn update_task(&self, id: &str, patch: TaskPatch) -> BoardResult<Task> {
        let tx = self.conn.unchecked_transaction()?;
        let mut task = fetch_task(&tx, id)?.ok_or_else(|| BoardError::not_found("Task", id))?;

        if let Some(title) = patch.title {
            task.title = required_text("title", &title)?;
        }
        if let Some(description) = patch.description {
            task.description = description;
        }
        if let Some(priority) = patch.priority {
            task.priority = priority;
        }
        if let Some(due_date) = patch.due_date {
            task.due_date = due_date;
        }
        if let Some(assignee_id) = patch.assignee_id {
            task.assignee = resolve_assignee(&tx, &task.workspace_id, assignee_id.as_deref())?;
        }
        if let Some(count) = patch.comments_count {
            if count < 0 {
                return Err(BoardError::Validation(
                    "comments_count must not be negative".into(),
                ));
            }
            task.comments_count = count;
        }

        tx.execute(
            "UPDATE tasks SET title = ?1, description = ?2, priority = ?3, due_date = ?4,
                 assignee_id = ?5, assignee_name = ?6, comments_count = ?7, updated_at = ?8
             WHERE id = ?9",
            params![
                task.title,
                task.description,
                task.priority.as_str(),
                task.due_date,
                task.assignee.as_ref().map(|a| a.id.as_str()),
                task.assignee.as_ref().map(|a| a.name.as_str()),
                task.comments_count,
                Utc::now(),
                id,
            ],
        )?;
        tx.commit()?;
        self.require_task(id)
    }

    /// Remove a task and close the gap it leaves in its column.
    pub fn delete_task(&self, id: &str) -> BoardResult<Task> {
        let tx = self.conn.unchecked_transaction()?;
        let task = fetch_task(&tx, id)?.ok_or_else(|| BoardError::not_found("Task", id))?;

        tx.execute("DELETE FROM tasks WHERE id = ?1", params![id])?;
        let gap = ordering::plan_delete(Placement {
            column: task.column,
            order: task.order,
        });
        let shifted = apply_shift(&tx, &task.workspace_id, &gap, &task.id)?;
        verify_partition(&tx, &task.workspace_id, task.column)?;
        tx.commit()?;

        debug!(task_id = id, workspace_id = %task.workspace_id, column = %task.column, shifted, "deleted task");
        Ok(task)
    }

    /// Relocate a task within or across columns, renumbering siblings so that
    /// both partitions stay dense. All shifts commit together or not at all.
    pub fn move_task(&self, id: &str, request: MoveRequest) -> BoardResult<MovedTask> {
        let tx = self.conn.unchecked_transaction()?;
        let task = fetch_task(&tx, id)?.ok_or_else(|| BoardError::not_found("Task", id))?;

        if request.source_column != task.column {
            return Err(BoardError::Conflict(format!(
                "Task {} is in column {}, not {}; refresh the board and retry",
                id, task.column, request.source_column
            )));
        }

        let current = Placement {
            column: task.column,
            order: task.order,
        };
        let others: i64 = tx.query_row(
            "SELECT COUNT(*) FROM tasks WHERE workspace_id = ?1 AND column_name = ?2 AND id != ?3",
            params![task.workspace_id, request.destination_column.as_str(), id],
            |row| row.get(0),
        )?;
        let index = ordering::resolve_index(request.new_index, others, self.index_policy)?;
        let plan = ordering::plan_move(current, request.destination_column, index);

        if plan.is_noop(current) {
            return Ok(MovedTask {
                from_column: task.column,
                from_order: task.order,
                task,
            });
        }

        let mut shifted = 0;
        for shift in &plan.shifts {
            shifted += apply_shift(&tx, &task.workspace_id, shift, id)?;
        }
        tx.execute(
            "UPDATE tasks SET column_name = ?1, position = ?2, updated_at = ?3 WHERE id = ?4",
            params![plan.target.column.as_str(), plan.target.order, Utc::now(), id],
        )?;
        for column in plan.touched_columns(current) {
            verify_partition(&tx, &task.workspace_id, column)?;
        }
        tx.commit()?;

        debug!(
            task_id = id,
            from = %current.column,
            from_order = current.order,
            to = %plan.target.column,
            to_order = plan.target.order,
            shifted,
            "moved task"
        );
        Ok(MovedTask {
            task: self.require_task(id)?,
            from_column: task.column,
            from_order: task.order,
        })
    }

    /// Tasks of a workspace grouped into the four columns, each ascending by order.
    pub fn list_by_column(&self, workspace_id: &str) -> BoardResult<Vec<ColumnView>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE workspace_id = ?1 ORDER BY position, created_at"
        ))?;
        let rows = stmt
            .query_map(params![workspace_id], task_row)?
            .collect::<Result<Vec<_>, _>>()?;
        let mut all_tasks = Vec::with_capacity(rows.len());
        for row in rows {
            all_tasks.push(row.into_task()?);
        }

        let columns = Column::ALL
            .iter()
            .map(|column| ColumnView {
                name: *column,
                tasks: all_tasks
                    .iter()
                    .filter(|t| t.column == *column)
                    .cloned()
                    .collect(),
            })
            .collect();
        Ok(columns)
    }

    pub fn get_board(&self, workspace_id: &str) -> BoardResult<BoardView> {
        let workspace = self.require_workspace(workspace_id)?;
        let columns = self.list_by_column(workspace_id)?;
        Ok(BoardView { workspace, columns })
    }

    /// Current orders of one partition, ascending.
    pub fn partition_orders(&self, workspace_id: &str, column: Column) -> BoardResult<Vec<i64>> {
        partition_orders(&self.conn, workspace_id, column)
    }

    // ── Repair ────────────────────────────────────────────────────────

    /// Renumber every partition of a workspace to `0..count`, keeping the
    /// current relative order (ties broken by creation time).
    pub fn reindex_workspace(&self, workspace_id: &str) -> BoardResult<Vec<ReindexReport>> {
        if fetch_workspace_row(&self.conn, workspace_id)?.is_none() {
            return Err(BoardError::not_found("Workspace", workspace_id));
        }

        let tx = self.conn.unchecked_transaction()?;
        let mut reports = Vec::new();
        for column in Column::ALL {
            let mut stmt = tx.prepare(
                "SELECT id, position FROM tasks WHERE workspace_id = ?1 AND column_name = ?2
                 ORDER BY position, created_at, id",
            )?;
            let rows = stmt
                .query_map(params![workspace_id, column.as_str()], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
                })?
                .collect::<Result<Vec<_>, _>>()?;

            let mut changed = 0;
            for (expected, (task_id, position)) in rows.iter().enumerate() {
                let expected = expected as i64;
                if *position != expected {
                    tx.execute(
                        "UPDATE tasks SET position = ?1 WHERE id = ?2",
                        params![expected, task_id],
                    )?;
                    changed += 1;
                }
            }
            verify_partition(&tx, workspace_id, column)?;
            if changed > 0 {
                warn!(workspace_id, column = %column, changed, "repaired column order");
                reports.push(ReindexReport {
                    workspace_id: workspace_id.to_string(),
                    column,
                    changed,
                });
            }
        }
        tx.commit()?;
        Ok(reports)
    }

    pub fn reindex_all(&self) -> BoardResult<Vec<ReindexReport>> {
        let mut stmt = self.conn.prepare("SELECT id FROM workspaces ORDER BY created_at, id")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        let mut reports = Vec::new();
        for id in ids {
            reports.extend(self.reindex_workspace(&id)?);
        }
        Ok(reports)
    }
}

/// One partition renumbered by a reindex.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ReindexReport {
    pub workspace_id: String,
    pub column: Column,
    pub changed: usize,
}

// ── Ordering primitives ───────────────────────────────────────────────

/// Apply one shift as a single conditional update, evaluated against the
/// rows as they are when the statement runs.
fn apply_shift(conn: &Connection, workspace_id: &str, shift: &Shift, exclude_id: &str) -> BoardResult<usize> {
    let count = conn.execute(
        "UPDATE tasks SET position = position + ?1
         WHERE workspace_id = ?2 AND column_name = ?3 AND position >= ?4
           AND (?5 IS NULL OR position <= ?5) AND id != ?6",
        params![
            shift.delta,
            workspace_id,
            shift.column.as_str(),
            shift.from,
            shift.to,
            exclude_id
        ],
    )?;
    Ok(count)
}

fn partition_orders(conn: &Connection, workspace_id: &str, column: Column) -> BoardResult<Vec<i64>> {
    let mut stmt = conn.prepare(
        "SELECT position FROM tasks WHERE workspace_id = ?1 AND column_name = ?2 ORDER BY position",
    )?;
    let orders = stmt
        .query_map(params![workspace_id, column.as_str()], |row| row.get(0))?
        .collect::<Result<Vec<i64>, _>>()?;
    Ok(orders)
}

/// Fail the enclosing transaction if the partition is not exactly `0..count`.
fn verify_partition(conn: &Connection, workspace_id: &str, column: Column) -> BoardResult<()> {
    let orders = partition_orders(conn, workspace_id, column)?;
    ordering::check_dense(&orders).map_err(|detail| BoardError::ConsistencyFault {
        workspace_id: workspace_id.to_string(),
        column: column.to_string(),
        detail,
    })
}

// ── Internal lookups ──────────────────────────────────────────────────

fn required_text(field: &str, value: &str) -> BoardResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(BoardError::Validation(format!("{} must not be empty", field)));
    }
    Ok(trimmed.to_string())
}

/// Look up an assignee, who must be a member of the workspace.
fn resolve_assignee(conn: &Connection, workspace_id: &str, user_id: Option<&str>) -> BoardResult<Option<Assignee>> {
    let Some(user_id) = user_id else {
        return Ok(None);
    };
    let name: Option<String> = conn
        .query_row(
            "SELECT u.name FROM users u
             JOIN workspace_members m ON m.user_id = u.id
             WHERE m.workspace_id = ?1 AND u.id = ?2",
            params![workspace_id, user_id],
            |row| row.get(0),
        )
        .optional()?;
    match name {
        Some(name) => Ok(Some(Assignee {
            id: user_id.to_string(),
            name,
        })),
        None => Err(BoardError::Validation(format!(
            "Assignee {} is not a member of workspace {}",
            user_id, workspace_id
        ))),
    }
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        created_at: row.get(3)?,
    })
}

fn fetch_user(conn: &Connection, id: &str) -> BoardResult<Option<User>> {
    let user = conn
        .query_row(
            "SELECT id, name, email, created_at FROM users WHERE id = ?1",
            params![id],
            user_from_row,
        )
        .optional()?;
    Ok(user)
}

fn fetch_workspace_row(conn: &Connection, id: &str) -> BoardResult<Option<(String, String, String, DateTime<Utc>)>> {
    let row = conn
        .query_row(
            "SELECT id, name, owner_id, created_at FROM workspaces WHERE id = ?1",
            params![id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )
        .optional()?;
    Ok(row)
}

fn fetch_workspace(conn: &Connection, id: &str) -> BoardResult<Option<Workspace>> {
    let Some((id, name, owner_id, created_at)) = fetch_workspace_row(conn, id)? else {
        return Ok(None);
    };

    let mut stmt = conn.prepare(
        "SELECT u.id, u.name, u.email, u.created_at, m.role
         FROM workspace_members m JOIN users u ON u.id = m.user_id
         WHERE m.workspace_id = ?1
         ORDER BY m.joined_at, m.rowid",
    )?;
    let rows = stmt
        .query_map(params![id], |row| {
            Ok((user_from_row(row)?, row.get::<_, String>(4)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut members = Vec::with_capacity(rows.len());
    for (user, role) in rows {
        let role = Role::from_str(&role).map_err(|e| anyhow::anyhow!(e))?;
        members.push(Member { user, role });
    }

    Ok(Some(Workspace {
        id,
        name,
        owner_id,
        members,
        created_at,
    }))
}

fn fetch_task(conn: &Connection, id: &str) -> BoardResult<Option<Task>> {
    let row = conn
        .query_row(
            &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
            params![id],
            task_row,
        )
        .optional()?;
    row.map(TaskRow::into_task).transpose()
}

// ── Internal row helpers ──────────────────────────────────────────────

/// Intermediate row struct for reading tasks from SQLite before converting
/// column_name / priority strings into typed values.
struct TaskRow {
    id: String,
    workspace_id: String,
    title: String,
    description: Option<String>,
    priority: String,
    due_date: Option<DateTime<Utc>>,
    column_name: String,
    position: i64,
    assignee_id: Option<String>,
    assignee_name: Option<String>,
    comments_count: i64,
    created_by: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

fn task_row(row: &Row<'_>) -> rusqlite::Result<TaskRow> {
    Ok(TaskRow {
        id: row.get(0)?,
        workspace_id: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        priority: row.get(4)?,
        due_date: row.get(5)?,
        column_name: row.get(6)?,
        position: row.get(7)?,
        assignee_id: row.get(8)?,
        assignee_name: row.get(9)?,
        comments_count: row.get(10)?,
        created_by: row.get(11)?,
        created_at: row.get(12)?,
        updated_at: row.get(13)?,
    })
}

impl TaskRow {
    fn into_task(self) -> BoardResult<Task> {
        let column = Column::from_str(&self.column_name).map_err(|e| anyhow::anyhow!(e))?;
        let priority = Priority::from_str(&self.priority).map_err(|e| anyhow::anyhow!(e))?;
        let assignee = match (self.assignee_id, self.assignee_name) {
            (Some(id), Some(name)) => Some(Assignee { id, name }),
            _ => None,
        };

        Ok(Task {
            id: self.id,
            workspace_id: self.workspace_id,
            title: self.title,
            description: self.description,
            priority,
            due_date: self.due_date,
            column,
            order: self.position,
            assignee,
            comments_count: self.comments_count,
            created_by: self.created_by,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────
