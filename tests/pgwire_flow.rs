use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_postgres::{Client, Config, NoTls, SimpleQueryMessage, SimpleQueryRow};
use ulid::Ulid;

use slotd::model::DAY_MS;
use slotd::tenant::TenantManager;
use slotd::wire;

// ── Test infrastructure ──────────────────────────────────────

async fn start_test_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!("slotd_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let tm = Arc::new(TenantManager::new(dir, 1000, Duration::from_secs(60)));

    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let tm = tm.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, tm, "slotd".to_string()).await;
            });
        }
    });

    addr
}

async fn connect(addr: SocketAddr, user: &str) -> Client {
    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .dbname("test")
        .user(user)
        .password("slotd");

    let (client, connection) = config.connect(NoTls).await.unwrap();
    tokio::spawn(async move {
        let _ = connection.await;
    });
    client
}

async fn rows(client: &Client, sql: &str) -> Vec<SimpleQueryRow> {
    client
        .simple_query(sql)
        .await
        .unwrap()
        .into_iter()
        .filter_map(|m| match m {
            SimpleQueryMessage::Row(row) => Some(row),
            _ => None,
        })
        .collect()
}

fn sqlstate(err: &tokio_postgres::Error) -> Option<String> {
    err.as_db_error().map(|db| db.code().code().to_string())
}

/// Midnight UTC two days from now, so min_notice and the clock never interfere.
fn day_after_tomorrow() -> i64 {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as i64;
    (now / DAY_MS + 2) * DAY_MS
}

/// A 60-minute resource open around the clock, owned by `owner`'s session.
async fn open_resource(owner: &Client) -> Ulid {
    let rid = Ulid::new();
    owner
        .simple_query(&format!(
            "INSERT INTO resources (id, name, type, duration, slot_granularity) VALUES ('{rid}', 'Room 1', 'room', 60, 60)"
        ))
        .await
        .unwrap();
    for weekday in 0..7 {
        owner
            .simple_query(&format!(
                "INSERT INTO working_hours (resource_id, weekday, start_time, end_time) VALUES ('{rid}', {weekday}, '00:00', '24:00')"
            ))
            .await
            .unwrap();
    }
    rid
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn hold_then_book_over_the_wire() {
    let addr = start_test_server().await;
    let owner = connect(addr, "owner").await;
    let alice = connect(addr, "alice").await;
    let rid = open_resource(&owner).await;

    let day = day_after_tomorrow();
    let slots = rows(
        &alice,
        &format!(
            r#"SELECT * FROM availability WHERE resource_id = '{rid}' AND start >= {day} AND "end" <= {}"#,
            day + DAY_MS
        ),
    )
    .await;
    assert_eq!(slots.len(), 24);
    assert_eq!(slots[0].get("resource_name"), Some("Room 1"));
    assert_eq!(slots[0].get("resource_type"), Some("room"));
    assert_eq!(slots[0].get("timezone"), Some("UTC"));
    let start: i64 = slots[0].get("start").unwrap().parse().unwrap();
    let end: i64 = slots[0].get("end").unwrap().parse().unwrap();
    assert_eq!(start, day);

    let hold = rows(
        &alice,
        &format!(r#"INSERT INTO holds (resource_id, start, "end") VALUES ('{rid}', {start}, {end}) RETURNING *"#),
    )
    .await;
    assert_eq!(hold.len(), 1);
    let hold_id = hold[0].get("hold_id").unwrap().to_string();
    let expires_at: i64 = hold[0].get("expires_at").unwrap().parse().unwrap();
    assert!(expires_at > 0);

    let booking = rows(
        &alice,
        &format!(
            "INSERT INTO bookings (hold_id, customer_name, customer_email, total_amount) \
             VALUES ('{hold_id}', 'Alice', 'alice@example.com', 2500) RETURNING *"
        ),
    )
    .await;
    assert_eq!(booking.len(), 1);
    assert_eq!(booking[0].get("status"), Some("pending"));
    assert_eq!(booking[0].get("payment_status"), Some("pending"));
    assert_eq!(booking[0].get("total_amount"), Some("2500"));

    // The booked hour is gone from availability.
    let after = rows(
        &alice,
        &format!(
            r#"SELECT * FROM availability WHERE resource_id = '{rid}' AND start >= {day} AND "end" <= {}"#,
            day + DAY_MS
        ),
    )
    .await;
    assert_eq!(after.len(), 23);
    assert_ne!(after[0].get("start"), Some(start.to_string().as_str()));

    // The owner sees the booking; a stranger does not.
    let owner_view = rows(&owner, &format!("SELECT * FROM bookings WHERE resource_id = '{rid}'")).await;
    assert_eq!(owner_view.len(), 1);
    let bob = connect(addr, "bob").await;
    let bob_view = rows(&bob, &format!("SELECT * FROM bookings WHERE resource_id = '{rid}'")).await;
    assert!(bob_view.is_empty());
}

#[tokio::test]
async fn overlapping_hold_is_rejected() {
    let addr = start_test_server().await;
    let owner = connect(addr, "owner").await;
    let alice = connect(addr, "alice").await;
    let bob = connect(addr, "bob").await;
    let rid = open_resource(&owner).await;

    let start = day_after_tomorrow() + 10 * 3_600_000;
    let end = start + 3_600_000;
    alice
        .simple_query(&format!(
            r#"INSERT INTO holds (resource_id, start, "end") VALUES ('{rid}', {start}, {end})"#
        ))
        .await
        .unwrap();

    let err = bob
        .simple_query(&format!(
            r#"INSERT INTO holds (resource_id, start, "end") VALUES ('{rid}', {start}, {end})"#
        ))
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&err).as_deref(), Some("23P01"));
}

#[tokio::test]
async fn errors_carry_sqlstates() {
    let addr = start_test_server().await;
    let owner = connect(addr, "owner").await;
    let rid = open_resource(&owner).await;

    let err = owner.simple_query("SELECT * FROM nowhere").await.unwrap_err();
    assert_eq!(sqlstate(&err).as_deref(), Some("42P01"));

    let missing = Ulid::new();
    let day = day_after_tomorrow();
    let err = owner
        .simple_query(&format!(
            r#"SELECT * FROM availability WHERE resource_id = '{missing}' AND start >= {day} AND "end" <= {}"#,
            day + DAY_MS
        ))
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&err).as_deref(), Some("P0002"));

    let err = owner
        .simple_query(&format!(
            r#"SELECT * FROM availability WHERE resource_id = '{rid}' AND start >= -9223372036854775807 AND "end" <= 9223372036854775807"#
        ))
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&err).as_deref(), Some("54000"));

    // A slot that is not the configured 60 minutes.
    let start = day_after_tomorrow();
    let err = owner
        .simple_query(&format!(
            r#"INSERT INTO holds (resource_id, start, "end") VALUES ('{rid}', {start}, {})"#,
            start + 30 * 60_000
        ))
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&err).as_deref(), Some("22023"));

    // Only the owner may reconfigure.
    let mallory = connect(addr, "mallory").await;
    let err = mallory
        .simple_query(&format!("UPDATE resources SET is_active = false WHERE id = '{rid}'"))
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&err).as_deref(), Some("P0002"));
}

#[tokio::test]
async fn external_event_blocks_availability() {
    let addr = start_test_server().await;
    let owner = connect(addr, "owner").await;
    let rid = open_resource(&owner).await;

    let day = day_after_tomorrow();
    let event_id = Ulid::new();
    owner
        .simple_query(&format!(
            r#"INSERT INTO external_events (id, resource_id, start, "end", label) VALUES ('{event_id}', '{rid}', {day}, {}, 'offsite')"#,
            day + 6 * 3_600_000
        ))
        .await
        .unwrap();

    let query = format!(
        r#"SELECT * FROM availability WHERE resource_id = '{rid}' AND start >= {day} AND "end" <= {}"#,
        day + DAY_MS
    );
    assert_eq!(rows(&owner, &query).await.len(), 18);

    owner
        .simple_query(&format!("DELETE FROM external_events WHERE id = '{event_id}'"))
        .await
        .unwrap();
    assert_eq!(rows(&owner, &query).await.len(), 24);
}
