use anyhow::{bail, Context, Result};
use rusqlite::Connection;

/// Ordered schema steps; entry `n` brings `user_version` from `n` to `n + 1`.
const SCHEMA_STEPS: &[(&str, &str)] = &[("schema_v1.sql", include_str!("schemas/schema_v1.sql"))];

pub(crate) fn schema_version() -> i32 {
    SCHEMA_STEPS.len() as i32
}

/// Brings the session store schema up to date in a single transaction.
pub fn run_migrations(conn: &mut Connection) -> Result<()> {
    let target = schema_version();
    let found: i32 = conn
        .pragma_query_value(None, "user_version", |row| row.get(0))
        .context("could not read session store user_version")?;

    match found {
        v if v > target => bail!("session store schema v{v} is newer than this build (v{target})"),
        v if v == target => return Ok(()),
        _ => {}
    }

    let tx = conn
        .transaction()
        .context("could not begin session store migration")?;
    for (name, sql) in SCHEMA_STEPS.iter().skip(found.max(0) as usize) {
        tx.execute_batch(sql)
            .with_context(|| format!("applying {name} failed"))?;
    }
    tx.pragma_update(None, "user_version", target)
        .context("could not record session store user_version")?;
    tx.commit().context("could not commit session store migration")?;
    Ok(())
}
