//! Row-level security for tenant roles (Postgres only).
//!
//! Every tenant role is a member of [`GROUP_ROLE`]; a session switched to a
//! tenant role only sees rows whose `user_id` is that role's name.

use sea_orm_migration::prelude::*;
use sea_orm_migration::sea_orm::{ConnectionTrait, DbBackend};

#[derive(DeriveMigrationName)]
pub struct Migration;

/// Group role tenant roles join; grants and policies are attached to it.
pub const GROUP_ROLE: &str = "ledger_user";

fn up_statements() -> Vec<String> {
    let group = GROUP_ROLE;
    vec![
        format!(
            "DO $$ BEGIN \
                IF NOT EXISTS (SELECT 1 FROM pg_roles WHERE rolname = '{group}') THEN \
                    CREATE ROLE {group} NOLOGIN; \
                END IF; \
            END $$"
        ),
        format!("GRANT SELECT, INSERT, UPDATE, DELETE ON accounts, transactions TO {group}"),
        format!("GRANT USAGE, SELECT ON SEQUENCE accounts_id_seq TO {group}"),
        "ALTER TABLE accounts ENABLE ROW LEVEL SECURITY".to_string(),
        "ALTER TABLE transactions ENABLE ROW LEVEL SECURITY".to_string(),
        format!(
            "CREATE POLICY accounts_tenant ON accounts TO {group} \
                USING (user_id = current_user) WITH CHECK (user_id = current_user)"
        ),
        format!(
            "CREATE POLICY transactions_tenant ON transactions TO {group} \
                USING (user_id = current_user) WITH CHECK (user_id = current_user)"
        ),
    ]
}

fn down_statements() -> Vec<String> {
    let group = GROUP_ROLE;
    vec![
        "DROP POLICY IF EXISTS transactions_tenant ON transactions".to_string(),
        "DROP POLICY IF EXISTS accounts_tenant ON accounts".to_string(),
        "ALTER TABLE transactions DISABLE ROW LEVEL SECURITY".to_string(),
        "ALTER TABLE accounts DISABLE ROW LEVEL SECURITY".to_string(),
        format!("REVOKE ALL ON accounts, transactions FROM {group}"),
        format!("REVOKE ALL ON SEQUENCE accounts_id_seq FROM {group}"),
    ]
}

async fn run(manager: &SchemaManager<'_>, statements: Vec<String>) -> Result<(), DbErr> {
    if manager.get_database_backend() != DbBackend::Postgres {
        return Ok(());
    }
    let conn = manager.get_connection();
    for sql in statements {
        conn.execute_unprepared(&sql).await?;
    }
    Ok(())
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        run(manager, up_statements()).await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        run(manager, down_statements()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policies_target_the_group_role() {
        let statements = up_statements();
        let policies: Vec<_> = statements
            .iter()
            .filter(|sql| sql.starts_with("CREATE POLICY"))
            .collect();
        assert_eq!(policies.len(), 2);
        assert!(policies.iter().all(|sql| sql.contains("TO ledger_user ")));
    }
}
