pub mod config;
pub mod error;
pub mod ingest;
pub mod mail;
pub mod models;
pub mod status;
pub mod template;

/// Embedded reversible migrations, shared by the binary and the tests.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

#[cfg(any(test, feature = "test-support"))]
#[cfg_attr(not(test), allow(dead_code))]
pub mod test_support {
    use sqlx::PgPool;
    use uuid::Uuid;

    pub use database::{TestDatabase, TestDatabaseError};

    /// Seeding helpers for the tables the ingestion pipeline reads.
    pub struct TestFixtures<'a> {
        pool: &'a PgPool,
    }

    impl<'a> TestFixtures<'a> {
        pub fn new(pool: &'a PgPool) -> Self {
            Self { pool }
        }

        /// Insert a queue row, returning its id.
        pub async fn insert_queue(&self, name: &str, prefix: &str) -> Result<Uuid, sqlx::Error> {
            let id = Uuid::new_v4();
            sqlx::query("INSERT INTO queues (id, name, prefix) VALUES ($1, $2, $3)")
                .bind(id)
                .bind(name)
                .bind(prefix)
                .execute(self.pool)
                .await?;

            Ok(id)
        }

        /// Insert a supporter row, returning its id.
        pub async fn insert_supporter(&self, email: &str) -> Result<Uuid, sqlx::Error> {
            let id = Uuid::new_v4();
            sqlx::query("INSERT INTO supporters (id, email) VALUES ($1, $2)")
                .bind(id)
                .bind(email)
                .execute(self.pool)
                .await?;

            Ok(id)
        }
    }

    pub mod database {
        use sqlx::PgPool;
        use sqlx::postgres::PgPoolOptions;
        use std::time::Duration;
        use testcontainers::{GenericImage, ImageExt, core::WaitFor};
        use testcontainers_modules::testcontainers::{
            ContainerAsync, core::error::TestcontainersError, runners::AsyncRunner,
        };
        use thiserror::Error;

        #[derive(Debug, Error)]
        pub enum TestDatabaseError {
            #[error("database error: {0}")]
            Sqlx(#[from] sqlx::Error),
            #[error("migration error: {0}")]
            Migration(#[from] sqlx::migrate::MigrateError),
            #[error("container error: {0}")]
            Container(#[from] TestcontainersError),
        }

        /// Ephemeral Postgres for integration tests: one disposable
        /// container per instance, migrated and ready.
        pub struct TestDatabase {
            pool: PgPool,
            container: Option<ContainerAsync<GenericImage>>,
        }

        impl TestDatabase {
            pub async fn new() -> Result<Self, TestDatabaseError> {
                let image = GenericImage::new("postgres", "16-alpine").with_wait_for(
                    WaitFor::message_on_stderr("database system is ready to accept connections"),
                );

                let request = image
                    .with_env_var("POSTGRES_DB", "postgres")
                    .with_env_var("POSTGRES_USER", "postgres")
                    .with_env_var("POSTGRES_PASSWORD", "postgres");

                let container = request.start().await?;

                let host = container.get_host().await?.to_string();
                let port = container.get_host_port_ipv4(5432).await?;
                let url = format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

                // The readiness message also appears while the init script
                // runs its temporary server, so retry until the final
                // server actually accepts connections.
                let mut attempts = 0;
                let pool = loop {
                    match PgPoolOptions::new()
                        .max_connections(5)
                        .connect(&url)
                        .await
                    {
                        Ok(pool) => break pool,
                        Err(err) if attempts < 30 => {
                            attempts += 1;
                            log::debug!("waiting for test database: {}", err);
                            tokio::time::sleep(Duration::from_millis(500)).await;
                        }
                        Err(err) => return Err(TestDatabaseError::Sqlx(err)),
                    }
                };

                crate::MIGRATOR.run(&pool).await?;

                Ok(Self {
                    pool,
                    container: Some(container),
                })
            }

            pub fn pool(&self) -> &PgPool {
                &self.pool
            }

            pub fn pool_clone(&self) -> PgPool {
                self.pool.clone()
            }

            /// Close pool connections and tear the container down.
            pub async fn close(mut self) -> Result<(), TestDatabaseError> {
                self.pool.close().await;
                if let Some(container) = self.container.take() {
                    container.stop().await?;
                }
                Ok(())
            }
        }
    }
}
