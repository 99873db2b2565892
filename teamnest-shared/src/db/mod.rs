/// Database layer for TeamNest
///
/// - `pool`: PostgreSQL connection pool with a health check
/// - `migrations`: embedded schema migrations
///
/// Queries live with the PostgreSQL datastore in
/// [`store::PgStore`](crate::store::PgStore) and the node helpers in
/// [`graph::sql`](crate::graph::sql).

pub mod migrations;
pub mod pool;
