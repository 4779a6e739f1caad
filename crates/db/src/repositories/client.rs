use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;

use taskpilot_core::domain::client::{Brand, Client};
use taskpilot_core::ports::{ClientDirectory, StoreError};

use super::{decode_err, format_timestamp, parse_aliases, RepositoryError};
use crate::DbPool;

pub struct SqlClientDirectory {
    pool: DbPool,
}

impl SqlClientDirectory {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn save_client(&self, client: &Client) -> Result<(), RepositoryError> {
        let aliases = serde_json::to_string(&client.aliases).map_err(decode_err)?;
        sqlx::query(
            "INSERT INTO client (id, name, aliases_json, created_at) VALUES (?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET name = excluded.name, aliases_json = excluded.aliases_json",
        )
        .bind(&client.id)
        .bind(&client.name)
        .bind(aliases)
        .bind(format_timestamp(Utc::now()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn save_brand(&self, brand: &Brand) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO brand (id, client_id, name, created_at) VALUES (?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET client_id = excluded.client_id, name = excluded.name",
        )
        .bind(&brand.id)
        .bind(&brand.client_id)
        .bind(&brand.name)
        .bind(format_timestamp(Utc::now()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn clients(&self, client_id: Option<&str>) -> Result<Vec<Client>, RepositoryError> {
        let rows = match client_id {
            Some(id) => {
                sqlx::query("SELECT id, name, aliases_json FROM client WHERE id = ?")
                    .bind(id)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query("SELECT id, name, aliases_json FROM client ORDER BY name")
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        rows.iter().map(row_to_client).collect()
    }

    async fn brands(&self, client_id: &str) -> Result<Vec<Brand>, RepositoryError> {
        let rows =
            sqlx::query("SELECT id, client_id, name FROM brand WHERE client_id = ? ORDER BY name")
                .bind(client_id)
                .fetch_all(&self.pool)
                .await?;
        rows.iter()
            .map(|row| {
                Ok(Brand {
                    id: row.try_get("id").map_err(decode_err)?,
                    client_id: row.try_get("client_id").map_err(decode_err)?,
                    name: row.try_get("name").map_err(decode_err)?,
                })
            })
            .collect()
    }
}

fn row_to_client(row: &sqlx::sqlite::SqliteRow) -> Result<Client, RepositoryError> {
    let aliases: String = row.try_get("aliases_json").map_err(decode_err)?;
    Ok(Client {
        id: row.try_get("id").map_err(decode_err)?,
        name: row.try_get("name").map_err(decode_err)?,
        aliases: parse_aliases(&aliases)?,
    })
}

#[async_trait]
impl ClientDirectory for SqlClientDirectory {
    async fn list_clients(&self) -> Result<Vec<Client>, StoreError> {
        Ok(self.clients(None).await?)
    }

    async fn find_client(&self, client_id: &str) -> Result<Option<Client>, StoreError> {
        Ok(self.clients(Some(client_id)).await?.into_iter().next())
    }

    async fn list_brands(&self, client_id: &str) -> Result<Vec<Brand>, StoreError> {
        Ok(self.brands(client_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use taskpilot_core::domain::client::{Brand, Client};
    use taskpilot_core::ports::ClientDirectory;

    use super::SqlClientDirectory;
    use crate::repositories::test_support::migrated_pool;

    #[tokio::test]
    async fn clients_and_brands_are_listed_in_name_order() {
        let directory = SqlClientDirectory::new(migrated_pool().await);
        for (id, name) in [("c2", "Zephyr"), ("c1", "Acme")] {
            directory
                .save_client(&Client {
                    id: id.to_string(),
                    name: name.to_string(),
                    aliases: vec![name.to_lowercase()],
                })
                .await
                .expect("save client");
        }
        for (id, name) in [("b2", "Trail"), ("b1", "Summit")] {
            directory
                .save_brand(&Brand {
                    id: id.to_string(),
                    client_id: "c1".to_string(),
                    name: name.to_string(),
                })
                .await
                .expect("save brand");
        }

        let clients = directory.list_clients().await.expect("clients");
        let brands = directory.list_brands("c1").await.expect("brands");

        assert_eq!(clients.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(), vec!["Acme", "Zephyr"]);
        assert_eq!(clients[0].aliases, vec!["acme".to_string()]);
        assert_eq!(brands.iter().map(|b| b.name.as_str()).collect::<Vec<_>>(), vec!["Summit", "Trail"]);
        assert!(directory.list_brands("c2").await.expect("brands").is_empty());
        assert_eq!(directory.find_client("c2").await.expect("find").map(|c| c.name), Some("Zephyr".to_string()));
    }
}
