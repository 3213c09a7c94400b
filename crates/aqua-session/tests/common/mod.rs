#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use aqua_core::{OrderRequest, SearchQuery, WorkerAddress, WorkerId, WorkerProfile};
use aqua_storage::{DirectoryError, OrderReceipt, WorkerDirectory};
use async_trait::async_trait;

#[derive(Debug, Clone)]
struct SearchScript {
    delay: Duration,
    reply: Result<Vec<WorkerProfile>, u16>,
}

impl Default for SearchScript {
    fn default() -> Self {
        Self {
            delay: Duration::ZERO,
            reply: Ok(Vec::new()),
        }
    }
}

/// In-memory directory whose replies are scripted per rendered query.
#[derive(Debug, Default)]
pub struct ScriptedDirectory {
    searches: Mutex<HashMap<String, SearchScript>>,
    queries: Mutex<Vec<String>>,
    orders: Mutex<Vec<OrderRequest>>,
    search_calls: AtomicUsize,
    order_calls: AtomicUsize,
    failing_orders: AtomicUsize,
    order_delay: Mutex<Duration>,
}

impl ScriptedDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(self, query: &str, workers: Vec<WorkerProfile>) -> Self {
        self.reply_after(query, Duration::ZERO, workers)
    }

    pub fn reply_after(self, query: &str, delay: Duration, workers: Vec<WorkerProfile>) -> Self {
        self.script(query, delay, Ok(workers))
    }

    pub fn fail(self, query: &str, status: u16) -> Self {
        self.script(query, Duration::ZERO, Err(status))
    }

    pub fn fail_after(self, query: &str, delay: Duration, status: u16) -> Self {
        self.script(query, delay, Err(status))
    }

    pub fn fail_next_orders(self, count: usize) -> Self {
        self.failing_orders.store(count, Ordering::SeqCst);
        self
    }

    pub fn order_delay(self, delay: Duration) -> Self {
        *self.order_delay.lock().unwrap() = delay;
        self
    }

    fn script(self, query: &str, delay: Duration, reply: Result<Vec<WorkerProfile>, u16>) -> Self {
        self.searches
            .lock()
            .unwrap()
            .insert(query.to_string(), SearchScript { delay, reply });
        self
    }

    pub fn search_calls(&self) -> usize {
        self.search_calls.load(Ordering::SeqCst)
    }

    pub fn order_calls(&self) -> usize {
        self.order_calls.load(Ordering::SeqCst)
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }

    pub fn orders(&self) -> Vec<OrderRequest> {
        self.orders.lock().unwrap().clone()
    }
}

#[async_trait]
impl WorkerDirectory for ScriptedDirectory {
    async fn search(&self, query: &SearchQuery) -> Result<Vec<WorkerProfile>, DirectoryError> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        let rendered = query.to_string();
        self.queries.lock().unwrap().push(rendered.clone());
        let script = self
            .searches
            .lock()
            .unwrap()
            .get(&rendered)
            .cloned()
            .unwrap_or_default();

        tokio::time::sleep(script.delay).await;
        script.reply.map_err(|status| DirectoryError::HttpStatus {
            status,
            url: format!("stub://api/users/search?{rendered}"),
        })
    }

    async fn create_order(&self, order: &OrderRequest) -> Result<OrderReceipt, DirectoryError> {
        let call = self.order_calls.fetch_add(1, Ordering::SeqCst);
        self.orders.lock().unwrap().push(order.clone());
        let delay = *self.order_delay.lock().unwrap();

        tokio::time::sleep(delay).await;
        let failing = self
            .failing_orders
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            return Err(DirectoryError::HttpStatus {
                status: 500,
                url: "stub://api/orders".to_string(),
            });
        }
        Ok(OrderReceipt {
            body: serde_json::json!({ "_id": format!("order-{call}") }),
        })
    }
}

pub fn worker(id: &str, name: &str) -> WorkerProfile {
    WorkerProfile {
        id: WorkerId::from(id),
        name: name.to_string(),
        rating: 4.5,
        rating_count: 12,
        address: Some(WorkerAddress {
            city: Some("Austin".into()),
            state: Some("TX".into()),
        }),
        skills: ["plumbing".to_string()].into_iter().collect(),
        hourly_rate: Some(35.0),
        years_of_experience: Some(6),
        education_level: None,
        phone: Some("555-0100".into()),
        broker_id: None,
    }
}

pub fn brokered(id: &str, name: &str, broker_id: &str) -> WorkerProfile {
    WorkerProfile {
        broker_id: Some(broker_id.to_string()),
        ..worker(id, name)
    }
}
