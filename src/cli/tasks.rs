use super::ui;
use crate::api::TaskClient;
use crate::core::store::StoreError;
use crate::core::task::{Task, TaskId};
use anyhow::Result;
use comfy_table::Cell;

impl Task {
    pub fn display_as_table(&self) -> String {
        let mut table = ui::new_styled_table();
        table.set_header(vec![
            ui::header_cell("ID"),
            ui::header_cell("Code"),
            ui::header_cell("Idempotency Key"),
            ui::header_cell("Status"),
            ui::header_cell("Price"),
            ui::header_cell("Updated"),
        ]);
        table.add_row(vec![
            Cell::new(self.id),
            Cell::new(&self.code),
            Cell::new(&self.idempotency_key),
            ui::status_cell(self.status),
            ui::format_optional_cell(self.price, |p| format!("{p:.6}")),
            Cell::new(self.updated_at.format("%Y-%m-%d %H:%M:%S UTC")),
        ]);

        format!(
            "Quote: {}\n\n{}",
            ui::style_text(&self.code, ui::StyleType::Title),
            table
        )
    }
}

fn report_lookup(result: Result<Task, StoreError>, what: &str) -> Result<()> {
    match result {
        Ok(task) => {
            println!("{}", task.display_as_table());
            Ok(())
        }
        Err(StoreError::NotFound) => {
            println!(
                "{}",
                ui::style_text(&format!("No {what} found"), ui::StyleType::Error)
            );
            anyhow::bail!("{what} not found")
        }
        Err(e) => Err(e.into()),
    }
}

/// Admits a task, printing the existing one when the request is a retry.
pub async fn request(client: &TaskClient, code: &str, idempotency_key: &str) -> Result<Task> {
    let task = client.request(code, idempotency_key).await?;
    println!("{}", task.display_as_table());
    println!(
        "{}",
        ui::style_text(
            &format!("Check progress with: fxquote get {} {}", task.code, task.id),
            ui::StyleType::Subtle
        )
    );
    Ok(task)
}

pub async fn get(client: &TaskClient, code: &str, id: TaskId) -> Result<()> {
    report_lookup(client.get(code, id).await, "task")
}

pub async fn latest(client: &TaskClient, code: &str) -> Result<()> {
    report_lookup(client.latest(code).await, "successful quote")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::create_routes;
    use crate::core::store::TaskStore;
    use crate::store::MemoryTaskStore;
    use std::sync::Arc;
    use tokio::net::TcpListener;

    async fn spawn_server(store: MemoryTaskStore) -> TaskClient {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(async move {
            axum::serve(listener, create_routes(Arc::new(store)))
                .await
                .unwrap();
        });
        TaskClient::new(&address).unwrap()
    }

    #[tokio::test]
    async fn test_request_then_lookup() {
        let store = MemoryTaskStore::new();
        let client = spawn_server(store.clone()).await;
        let task = request(&client, "EUR_USD", "k1").await.unwrap();
        let again = request(&client, "EUR_USD", "k1").await.unwrap();
        assert_eq!(task, again);

        assert!(get(&client, "EUR_USD", task.id).await.is_ok());
        assert!(get(&client, "EUR_USD", task.id + 1).await.is_err());

        let err = latest(&client, "EUR_USD").await.unwrap_err();
        assert!(err.to_string().contains("not found"));

        let mut resolved = store.get_task("EUR_USD", task.id).await.unwrap();
        resolved.resolve(1.08);
        store.update_task(&resolved).await.unwrap();
        assert!(latest(&client, "EUR_USD").await.is_ok());
    }

    #[tokio::test]
    async fn test_unreachable_server_is_reported() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let client = TaskClient::new(&address).unwrap();
        let err = get(&client, "EUR_USD", 1).await.unwrap_err();
        assert!(err.to_string().contains("fxquote serve"), "{err}");
    }

    #[test]
    fn test_display_as_table() {
        let mut task = Task::pending(3, "EUR_USD", "k1", chrono::Utc::now());
        let pending = task.display_as_table();
        assert!(pending.contains("EUR_USD"));
        assert!(pending.contains("N/A"));

        task.resolve(1.08);
        let resolved = task.display_as_table();
        assert!(resolved.contains("1.080000"));
        assert!(resolved.contains("success"));
    }
}
