//! The booking dialog end to end against a real SQLite store, with scripted
//! model replies standing in for the language model.

use async_trait::async_trait;
use docent_agent::{
    Capabilities, Classifier, Engine, EngineConfig, IntentVerdict, RunConfig, StatementGuard,
    ThreadId, Transport, TurnSummary,
};
use docent_ai::{AssistantMetadata, Content, Context, Message, Model};
use docent_db::{
    DbPool, SqliteCheckpointer, SqliteDataAccess, connect_with_settings, migrations::run_pending,
    seed_museums,
};
use parking_lot::Mutex;
use sqlx::Row;
use std::sync::Arc;

struct Scripted {
    replies: Mutex<Vec<Message>>,
}

#[async_trait]
impl Transport for Scripted {
    async fn complete(&self, _context: &Context, _config: &RunConfig) -> docent_ai::Result<Message> {
        let mut replies = self.replies.lock();
        Ok(if replies.is_empty() {
            Message::assistant("done")
        } else {
            replies.remove(0)
        })
    }
}

struct AlwaysTicket;

#[async_trait]
impl Classifier for AlwaysTicket {
    async fn classify(&self, _history: &[Message]) -> docent_agent::Result<IntentVerdict> {
        Ok(IntentVerdict {
            is_ticket: true,
            is_museum: false,
            redirect_text: String::new(),
        })
    }
}

fn write_call(query: &str) -> Message {
    Message::Assistant {
        content: vec![Content::tool_call(
            "call_0",
            "write_and_update_db",
            serde_json::json!({ "query": query }),
        )],
        metadata: AssistantMetadata::default(),
    }
}

fn answer(booked: bool, text: &str) -> Message {
    Message::assistant(serde_json::json!({"booked": booked, "answer": text}).to_string())
}

async fn pool() -> DbPool {
    let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
    run_pending(&pool).await.expect("run migrations");
    seed_museums(&pool).await.expect("seed");
    pool
}

fn engine(pool: &DbPool, replies: Vec<Message>) -> Engine {
    Engine::new(
        EngineConfig::new(Model::gemini("test")),
        Capabilities {
            transport: Arc::new(Scripted {
                replies: Mutex::new(replies),
            }),
            classifier: Arc::new(AlwaysTicket),
            safety: Arc::new(StatementGuard::new()),
            data: Arc::new(SqliteDataAccess::new(pool.clone())),
        },
        Arc::new(SqliteCheckpointer::new(pool.clone())),
    )
    .expect("engine")
}

async fn ticket_count(pool: &DbPool) -> i64 {
    sqlx::query("SELECT COUNT(*) AS count FROM tickets")
        .fetch_one(pool)
        .await
        .expect("count tickets")
        .get::<i64, _>("count")
}

#[tokio::test]
async fn confirmed_booking_writes_one_ticket() {
    let pool = pool().await;
    let engine = engine(
        &pool,
        vec![
            answer(false, "Please confirm: 2 tickets for City Art Museum on 2030-01-01?"),
            write_call(
                "INSERT INTO tickets (museum_id, visitor_name, visitor_email, num_tickets, visit_date, status) \
                 VALUES (1, 'Jane Doe', 'jane@x.com', 2, '2030-01-01', 'BOOKED') RETURNING ticket_id",
            ),
            answer(true, "Booked! Your ticket id is 1."),
        ],
    );
    let thread = ThreadId::new();

    let first = TurnSummary::collect(
        engine
            .send(thread, "Book 2 tickets for City Art Museum on 2030-01-01, Jane Doe, jane@x.com")
            .await
            .expect("send"),
    )
    .await;
    let (handle, _) = first.interrupt.expect("asks for confirmation");
    assert_eq!(ticket_count(&pool).await, 0);

    let second = TurnSummary::collect(engine.resume_at(&handle, "yes").await.expect("resume")).await;
    assert!(second.completed, "error: {:?}", second.error);
    assert_eq!(second.tool_calls.len(), 1);
    assert!(!second.tool_calls[0].is_error);
    assert!(second.tool_calls[0].result.contains("ticket_id"));
    assert_eq!(ticket_count(&pool).await, 1);
}

#[tokio::test]
async fn unscoped_update_leaves_store_untouched() {
    let pool = pool().await;
    sqlx::query(
        "INSERT INTO tickets (museum_id, visitor_name, num_tickets, visit_date) \
         VALUES (1, 'Jane Doe', 2, '2030-01-01')",
    )
    .execute(&pool)
    .await
    .expect("existing booking");

    let engine = engine(
        &pool,
        vec![
            write_call("UPDATE tickets SET status = 'CANCELLED'"),
            answer(false, "Which booking should I cancel?"),
        ],
    );
    let summary =
        TurnSummary::collect(engine.send(ThreadId::new(), "Cancel everything").await.expect("send"))
            .await;

    assert!(summary.interrupt.is_some());
    let status = sqlx::query("SELECT status FROM tickets WHERE ticket_id = 1")
        .fetch_one(&pool)
        .await
        .expect("load ticket")
        .get::<String, _>("status");
    assert_eq!(status, "BOOKED");
}

#[tokio::test]
async fn suspended_thread_resumes_from_another_engine() {
    let pool = pool().await;
    let thread = ThreadId::new();

    let first = engine(&pool, vec![answer(false, "What is your email?")]);
    let summary = TurnSummary::collect(first.send(thread, "Book tickets").await.expect("send")).await;
    assert!(summary.interrupt.is_some());
    drop(first);

    // a fresh engine over the same store picks the thread up
    let second = engine(&pool, vec![answer(false, "Thanks. How many tickets?")]);
    let summary = TurnSummary::collect(second.resume(thread, "jane@x.com").await.expect("resume")).await;
    let (_, payload) = summary.interrupt.expect("still gathering details");
    assert_eq!(payload.message, "Thanks. How many tickets?");

    let state = second.state(thread).await.expect("state").expect("present");
    assert_eq!(state.collected_details, vec!["jane@x.com".to_string()]);
}
