//! Embedded graph schema and migration ledger.
//!
//! One SQLite database holds every node label as a table plus a single typed
//! `edges` table. Each node table carries the namespace triple and the TTL
//! lifecycle columns. Migrations are applied sequentially and recorded in
//! `schema_version`.

use rusqlite::{Connection, Result as SqliteResult};

/// Current schema version.
pub const SCHEMA_VERSION: i32 = 2;

/// Initialize the database schema, applying any pending migrations.
pub fn initialize_schema(conn: &Connection) -> SqliteResult<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        [],
    )?;

    let current_version: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current_version < 1 {
        apply_v1_schema(conn)?;
    }
    if current_version < 2 {
        apply_v2_engram_metadata(conn)?;
    }

    Ok(())
}

const NAMESPACE_COLUMNS: &str = "tenant_id TEXT NOT NULL,
            team_id TEXT NOT NULL,
            project_id TEXT NOT NULL";

fn apply_v1_schema(conn: &Connection) -> SqliteResult<()> {
    conn.execute(
        &format!(
            "CREATE TABLE IF NOT EXISTS decisions (
            id TEXT PRIMARY KEY,
            statement TEXT NOT NULL,
            alternatives TEXT NOT NULL,
            confidence REAL NOT NULL,
            module TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            created_by TEXT NOT NULL,
            outcome TEXT,
            resolved_at INTEGER,
            actual_success_rate REAL,
            engram_id TEXT,
            commit_sha TEXT,
            memory_type TEXT,
            memory_subject TEXT,
            ttl_days INTEGER,
            last_verified_at INTEGER,
            is_active INTEGER NOT NULL DEFAULT 1,
            deprecated_reason TEXT,
            source TEXT,
            role_id TEXT,
            assignment_id TEXT,
            embedding BLOB,
            {NAMESPACE_COLUMNS}
        )"
        ),
        [],
    )?;

    conn.execute(
        &format!(
            "CREATE TABLE IF NOT EXISTS code_changes (
            id TEXT PRIMARY KEY,
            commit_sha TEXT NOT NULL,
            files_changed TEXT NOT NULL,
            timestamp INTEGER NOT NULL,
            author TEXT NOT NULL,
            decision_id TEXT,
            outcome TEXT,
            reverted_by TEXT,
            days_to_revert REAL,
            lines_added INTEGER NOT NULL DEFAULT 0,
            lines_removed INTEGER NOT NULL DEFAULT 0,
            {NAMESPACE_COLUMNS}
        )"
        ),
        [],
    )?;

    conn.execute(
        &format!(
            "CREATE TABLE IF NOT EXISTS outcomes (
            id TEXT PRIMARY KEY,
            decision_id TEXT NOT NULL,
            status TEXT NOT NULL,
            evidence TEXT NOT NULL DEFAULT '',
            measured_at INTEGER,
            performance_impact REAL,
            reliability REAL,
            maintenance_cost REAL,
            code_change_id TEXT,
            commit_sha TEXT,
            pr_number INTEGER,
            pr_url TEXT,
            submitted_at INTEGER,
            merged_at INTEGER,
            completed_at INTEGER,
            final_status TEXT,
            final_score REAL,
            lessons_learned TEXT NOT NULL DEFAULT '[]',
            signals TEXT NOT NULL DEFAULT '[]',
            ttl_days INTEGER,
            is_active INTEGER NOT NULL DEFAULT 1,
            deprecated_reason TEXT,
            created_at INTEGER NOT NULL,
            {NAMESPACE_COLUMNS}
        )"
        ),
        [],
    )?;

    conn.execute(
        &format!(
            "CREATE TABLE IF NOT EXISTS negative_knowledge (
            id TEXT PRIMARY KEY,
            hypothesis TEXT NOT NULL,
            conclusion TEXT NOT NULL,
            evidence TEXT NOT NULL DEFAULT '',
            domain TEXT NOT NULL,
            severity TEXT NOT NULL,
            discovered_at INTEGER NOT NULL,
            expires_at INTEGER,
            blocks_pattern TEXT,
            recommendation TEXT NOT NULL DEFAULT '',
            source TEXT NOT NULL DEFAULT 'manual',
            memory_type TEXT,
            memory_subject TEXT,
            ttl_days INTEGER,
            is_active INTEGER NOT NULL DEFAULT 1,
            deprecated_reason TEXT,
            embedding BLOB,
            {NAMESPACE_COLUMNS}
        )"
        ),
        [],
    )?;

    conn.execute(
        &format!(
            "CREATE TABLE IF NOT EXISTS antipatterns (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            category TEXT NOT NULL,
            severity TEXT NOT NULL,
            repos_affected INTEGER NOT NULL DEFAULT 0,
            occurrence_count INTEGER NOT NULL DEFAULT 0,
            removal_rate REAL NOT NULL DEFAULT 0,
            avg_days_to_removal REAL,
            keywords TEXT NOT NULL DEFAULT '[]',
            regex_pattern TEXT NOT NULL,
            example_bad TEXT,
            example_good TEXT,
            first_seen INTEGER NOT NULL,
            recommendation TEXT NOT NULL DEFAULT '',
            {NAMESPACE_COLUMNS}
        )"
        ),
        [],
    )?;

    conn.execute(
        &format!(
            "CREATE TABLE IF NOT EXISTS engrams (
            id TEXT PRIMARY KEY,
            session_id TEXT NOT NULL,
            commit_sha TEXT,
            branch TEXT,
            created_at INTEGER NOT NULL,
            decisions_extracted INTEGER NOT NULL DEFAULT 0,
            files_changed INTEGER NOT NULL DEFAULT 0,
            intent TEXT,
            {NAMESPACE_COLUMNS}
        )"
        ),
        [],
    )?;

    conn.execute(
        &format!(
            "CREATE TABLE IF NOT EXISTS skills (
            id TEXT PRIMARY KEY,
            domain TEXT NOT NULL,
            name TEXT NOT NULL,
            version INTEGER NOT NULL,
            success_rate REAL NOT NULL,
            confidence REAL NOT NULL,
            sample_size INTEGER NOT NULL,
            procedure TEXT NOT NULL,
            green_zone TEXT NOT NULL DEFAULT '[]',
            yellow_zone TEXT NOT NULL DEFAULT '[]',
            red_zone TEXT NOT NULL DEFAULT '[]',
            quality_score REAL NOT NULL,
            generated_from_decisions TEXT NOT NULL DEFAULT '[]',
            created_at INTEGER NOT NULL,
            last_updated INTEGER NOT NULL,
            next_review INTEGER NOT NULL,
            ttl_days INTEGER,
            is_active INTEGER NOT NULL DEFAULT 1,
            deprecated_reason TEXT,
            {NAMESPACE_COLUMNS}
        )"
        ),
        [],
    )?;

    conn.execute(
        &format!(
            "CREATE TABLE IF NOT EXISTS documents (
            id TEXT PRIMARY KEY,
            file_path TEXT NOT NULL,
            content TEXT NOT NULL,
            doc_type TEXT NOT NULL,
            updated_at INTEGER NOT NULL,
            metadata TEXT,
            {NAMESPACE_COLUMNS}
        )"
        ),
        [],
    )?;

    conn.execute(
        &format!(
            "CREATE TABLE IF NOT EXISTS doc_shots (
            id TEXT PRIMARY KEY,
            doc_count INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            {NAMESPACE_COLUMNS}
        )"
        ),
        [],
    )?;

    conn.execute(
        &format!(
            "CREATE TABLE IF NOT EXISTS session_contexts (
            session_id TEXT NOT NULL,
            task TEXT NOT NULL,
            focus TEXT,
            current_plan TEXT,
            constraints TEXT NOT NULL DEFAULT '[]',
            doc_shot_id TEXT,
            created_at INTEGER NOT NULL,
            expires_at INTEGER NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 1,
            {NAMESPACE_COLUMNS},
            PRIMARY KEY (session_id, tenant_id, team_id, project_id)
        )"
        ),
        [],
    )?;

    conn.execute(
        &format!(
            "CREATE TABLE IF NOT EXISTS workspaces (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            description TEXT,
            created_at INTEGER NOT NULL,
            {NAMESPACE_COLUMNS}
        )"
        ),
        [],
    )?;

    conn.execute(
        &format!(
            "CREATE TABLE IF NOT EXISTS projects (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            description TEXT,
            workspace_id TEXT,
            constraints TEXT NOT NULL DEFAULT '[]',
            created_at INTEGER NOT NULL,
            {NAMESPACE_COLUMNS}
        )"
        ),
        [],
    )?;

    conn.execute(
        &format!(
            "CREATE TABLE IF NOT EXISTS roles (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            description TEXT,
            prompt_path TEXT,
            created_at INTEGER NOT NULL,
            {NAMESPACE_COLUMNS},
            UNIQUE (name, tenant_id, team_id, project_id)
        )"
        ),
        [],
    )?;

    conn.execute(
        &format!(
            "CREATE TABLE IF NOT EXISTS profiles (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            config_path TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            {NAMESPACE_COLUMNS},
            UNIQUE (name, tenant_id, team_id, project_id)
        )"
        ),
        [],
    )?;

    conn.execute(
        &format!(
            "CREATE TABLE IF NOT EXISTS squads (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            project_ref TEXT NOT NULL,
            strategy TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            {NAMESPACE_COLUMNS},
            UNIQUE (name, tenant_id, team_id, project_id)
        )"
        ),
        [],
    )?;

    conn.execute(
        &format!(
            "CREATE TABLE IF NOT EXISTS assignments (
            id TEXT PRIMARY KEY,
            squad_id TEXT NOT NULL,
            role_id TEXT NOT NULL,
            profile_id TEXT NOT NULL,
            position INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            {NAMESPACE_COLUMNS}
        )"
        ),
        [],
    )?;

    conn.execute(
        &format!(
            "CREATE TABLE IF NOT EXISTS edges (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            edge_type TEXT NOT NULL,
            from_label TEXT NOT NULL,
            from_id TEXT NOT NULL,
            to_label TEXT NOT NULL,
            to_id TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            properties TEXT NOT NULL DEFAULT '{{}}',
            {NAMESPACE_COLUMNS},
            UNIQUE (edge_type, from_id, to_id, tenant_id, team_id, project_id)
        )"
        ),
        [],
    )?;

    // Indexes for the hot analytics paths
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_decisions_module ON decisions(module)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_decisions_outcome ON decisions(outcome)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_decisions_created ON decisions(created_at)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_outcomes_decision ON outcomes(decision_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_nk_domain ON negative_knowledge(domain)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_skills_domain ON skills(domain)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_edges_from ON edges(edge_type, from_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_edges_to ON edges(edge_type, to_id)",
        [],
    )?;

    conn.execute("INSERT INTO schema_version (version) VALUES (1)", [])?;
    Ok(())
}

/// v2: agent metadata on engrams (type, model, duration, token counts).
fn apply_v2_engram_metadata(conn: &Connection) -> SqliteResult<()> {
    conn.execute("ALTER TABLE engrams ADD COLUMN agent_type TEXT", [])?;
    conn.execute("ALTER TABLE engrams ADD COLUMN agent_model TEXT", [])?;
    conn.execute(
        "ALTER TABLE engrams ADD COLUMN session_duration_sec INTEGER",
        [],
    )?;
    conn.execute("ALTER TABLE engrams ADD COLUMN total_tokens INTEGER", [])?;

    conn.execute("INSERT INTO schema_version (version) VALUES (2)", [])?;
    Ok(())
}

/// Get the current schema version.
pub fn get_schema_version(conn: &Connection) -> SqliteResult<i32> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )
}

/// Applied migrations, oldest first.
pub fn migration_history(conn: &Connection) -> SqliteResult<Vec<(i32, String)>> {
    let mut stmt =
        conn.prepare("SELECT version, applied_at FROM schema_version ORDER BY version")?;
    let rows = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .filter_map(|r| r.ok())
        .collect();
    Ok(rows)
}

/// Check if the schema is initialized.
pub fn is_initialized(conn: &Connection) -> bool {
    conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='decisions'",
        [],
        |row| row.get::<_, i32>(0),
    )
    .map(|count| count > 0)
    .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initialize_schema() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();

        assert!(is_initialized(&conn));
        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn test_idempotent_initialization() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();
        initialize_schema(&conn).unwrap();

        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn test_migration_history() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();

        let history = migration_history(&conn).unwrap();
        let versions: Vec<i32> = history.iter().map(|(v, _)| *v).collect();
        assert_eq!(versions, vec![1, 2]);
    }

    #[test]
    fn test_v2_columns_exist() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();

        conn.execute(
            "INSERT INTO engrams (id, session_id, created_at, agent_type, agent_model,
                                  tenant_id, team_id, project_id)
             VALUES ('eng_x', 's1', 0, 'coder', 'claude', 't', 'tm', 'p')",
            [],
        )
        .unwrap();
    }
}
