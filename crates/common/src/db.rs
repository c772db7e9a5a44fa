use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

/// Connect to the cursor database and apply pending migrations.
///
/// Fails fast so a misconfigured `DATABASE_URL` is a startup error rather
/// than a per-tick storage failure.
pub async fn connect_cursor_db(database_url: &str, max_connections: u32) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(std::time::Duration::from_secs(5))
        .connect(database_url)
        .await?;

    sqlx::migrate!("../../migrations").run(&pool).await?;

    tracing::info!(max_connections, "Connected to cursor database, migrations applied");
    Ok(pool)
}
