//! Sync sessions against the fake server.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::runtime::Handle;

use htsp_sync_core::{Channel, Message, MessageKind, OriginalNetworkId};
use htsp_sync_engine::{
    CancelToken, Connection, ConnectionConfig, ConnectionError, Dispatcher, SessionPhase,
    SyncConfig, SyncError, SyncSession, HTSP_VERSION,
};
use htsp_sync_store::{ChannelStore, MemoryStore, ProgramStore, SqliteStore, Store, StoreOp};
use htsp_sync_testkit::{init_tracing, FakeServer, LineupFixture, Reply, ServerScript};

const WAIT: Duration = Duration::from_secs(5);

fn session<S: Store + ?Sized>(store: Arc<S>) -> SyncSession<S> {
    init_tracing();
    let handle = Handle::current();
    let connection = Connection::new(
        ConnectionConfig::default(),
        Dispatcher::new(&handle),
        handle,
    );
    SyncSession::new(connection, store, SyncConfig::default(), CancelToken::new())
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64
}

#[tokio::test]
async fn test_three_channels_inserted() {
    let lineup = LineupFixture::three();
    let server = FakeServer::start(ServerScript::with_lineup(
        lineup.channels.clone(),
        lineup.programs.clone(),
    ))
    .await
    .unwrap();

    let store = Arc::new(MemoryStore::new());
    let session = session(Arc::clone(&store));
    let phase = session.subscribe_phase();

    let report = session.run(server.address()).await.unwrap();

    assert_eq!(*phase.borrow(), SessionPhase::Done);
    assert_eq!(report.channels_received, 3);
    assert_eq!(report.programs_received, 3);
    assert_eq!(report.reconcile.channels_inserted, 3);
    assert_eq!(report.reconcile.programs_written, 3);
    assert_eq!(report.server.server_name.as_deref(), Some("Tvheadend"));
    assert_eq!(report.server.htsp_version, Some(34));

    let inserts: Vec<_> = store
        .journal()
        .unwrap()
        .into_iter()
        .filter_map(|op| match op {
            StoreOp::InsertChannel(_, id) => Some(id),
            _ => None,
        })
        .collect();
    assert_eq!(
        inserts,
        vec![OriginalNetworkId(101), OriginalNetworkId(102), OriginalNetworkId(103)]
    );
}

#[tokio::test]
async fn test_handshake_requests() {
    let server = FakeServer::start(ServerScript::default()).await.unwrap();
    let store = Arc::new(MemoryStore::new());

    let before = unix_now();
    session(store).run(server.address()).await.unwrap();
    let after = unix_now();

    let requests = server.requests();
    let kinds: Vec<_> = requests.iter().filter_map(Message::kind).collect();
    assert_eq!(kinds, vec![MessageKind::Hello, MessageKind::EnableAsyncMetadata]);

    let hello = requests[0].fields();
    assert_eq!(hello.req_i64("htspversion"), Ok(HTSP_VERSION));
    assert_eq!(hello.req_str("clientname"), Ok("htsp-sync"));

    let metadata = requests[1].fields();
    assert_eq!(metadata.req_i64("epg"), Ok(1));
    let max_time = metadata.req_i64("epgMaxTime").unwrap();
    assert!(max_time >= before + 60 && max_time <= after + 60);

    assert!(requests[1].seq() > requests[0].seq());
}

#[tokio::test]
async fn test_stale_channel_deleted_and_existing_updated() {
    let lineup = LineupFixture::three();
    let store = Arc::new(MemoryStore::with_channels(vec![
        Channel::new(101, 1, "Old One"),
        Channel::new(999, 9, "Gone"),
    ]));
    let server = FakeServer::start(ServerScript::with_lineup(lineup.channels, Vec::new()))
        .await
        .unwrap();

    let report = session(Arc::clone(&store)).run(server.address()).await.unwrap();

    assert_eq!(report.reconcile.channels_updated, 1);
    assert_eq!(report.reconcile.channels_inserted, 2);
    assert_eq!(report.reconcile.channels_deleted, 1);
    assert_eq!(store.lookup(OriginalNetworkId(999)).await.unwrap(), None);

    let row = store.lookup(OriginalNetworkId(101)).await.unwrap().unwrap();
    assert_eq!(store.channel(row).unwrap().unwrap().name, "One");
}

#[tokio::test]
async fn test_malformed_push_skipped() {
    let lineup = LineupFixture::three();
    let broken = Message::default()
        .with("method", "channelAdd")
        .with("channelName", "no id");
    let script = ServerScript::with_lineup(lineup.channels, Vec::new()).push(broken);
    let server = FakeServer::start(script).await.unwrap();

    let store = Arc::new(MemoryStore::new());
    let report = session(Arc::clone(&store)).run(server.address()).await.unwrap();

    assert_eq!(report.pushes_rejected, 1);
    assert_eq!(report.channels_received, 3);
    assert_eq!(store.channel_count().unwrap(), 3);
}

#[tokio::test]
async fn test_unknown_push_ignored() {
    let script = ServerScript::default().push(
        Message::default()
            .with("method", "tagAdd")
            .with("tagId", 4i64),
    );
    let server = FakeServer::start(script).await.unwrap();

    let report = session(Arc::new(MemoryStore::new()))
        .run(server.address())
        .await
        .unwrap();
    assert_eq!(report.pushes_rejected, 0);
}

#[tokio::test]
async fn test_sqlite_store_end_to_end() {
    let lineup = LineupFixture::three();
    let server = FakeServer::start(ServerScript::with_lineup(
        lineup.channels.clone(),
        lineup.programs.clone(),
    ))
    .await
    .unwrap();

    let store = Arc::new(SqliteStore::open_memory().unwrap());
    let report = session(Arc::clone(&store)).run(server.address()).await.unwrap();
    assert_eq!(report.reconcile.channels_inserted, 3);

    let stored = store.list_channels().await.unwrap();
    let names: Vec<_> = stored.iter().map(|s| s.channel.name.as_str()).collect();
    assert_eq!(names, vec!["One", "Two", "Three HD"]);

    let programs = store.list_programs(stored[2].row).await.unwrap();
    assert_eq!(programs.len(), 1);
    assert_eq!(programs[0].title, "Film");
}

#[tokio::test]
async fn test_rejected_hello_fails() {
    let server = FakeServer::start(ServerScript::default().hello(Reply::Error("Bad client".into())))
        .await
        .unwrap();

    let err = session(Arc::new(MemoryStore::new()))
        .run(server.address())
        .await
        .unwrap_err();
    match err {
        SyncError::Server { method, message } => {
            assert_eq!(method, "hello");
            assert_eq!(message, "Bad client");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_metadata_noaccess_fails() {
    let server = FakeServer::start(ServerScript::default().metadata(Reply::NoAccess))
        .await
        .unwrap();

    let store = Arc::new(MemoryStore::new());
    let err = session(Arc::clone(&store))
        .run(server.address())
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Server { .. }));
    assert!(store.journal().unwrap().is_empty());
}

#[tokio::test]
async fn test_garbage_reply_fails_session() {
    let server = FakeServer::start(ServerScript::default().hello(Reply::Garbage))
        .await
        .unwrap();

    let session = session(Arc::new(MemoryStore::new()));
    let phase = session.subscribe_phase();
    let err = session.run(server.address()).await.unwrap_err();

    assert!(matches!(
        err,
        SyncError::Connection(ConnectionError::Decode(_))
    ));
    assert_eq!(*phase.borrow(), SessionPhase::Failed);
}

#[tokio::test]
async fn test_hang_up_before_completion_fails() {
    let lineup = LineupFixture::three();
    let script = ServerScript::with_lineup(lineup.channels, Vec::new()).hang_up();
    let server = FakeServer::start(script).await.unwrap();

    let store = Arc::new(MemoryStore::new());
    let err = session(Arc::clone(&store))
        .run(server.address())
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::Connection(_)));
    assert_eq!(store.channel_count().unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_completion_before_hang_up_wins() {
    for _ in 0..50 {
        let lineup = LineupFixture::new(200);
        let script =
            ServerScript::with_lineup(lineup.channels, Vec::new()).complete_then_hang_up();
        let server = FakeServer::start(script).await.unwrap();

        let store = Arc::new(MemoryStore::new());
        let report = session(Arc::clone(&store))
            .run(server.address())
            .await
            .unwrap();

        assert_eq!(report.channels_received, 200);
        assert_eq!(report.reconcile.channels_inserted, 200);
        assert_eq!(store.channel_count().unwrap(), 200);
    }
}

#[tokio::test]
async fn test_cancel_while_waiting_for_completion() {
    let lineup = LineupFixture::three();
    let script = ServerScript::with_lineup(lineup.channels, Vec::new()).stall();
    let server = FakeServer::start(script).await.unwrap();

    let store = Arc::new(MemoryStore::new());
    let session = session(Arc::clone(&store));
    let cancel = session.cancel_token().clone();
    let mut phase = session.subscribe_phase();

    let canceller = async {
        tokio::time::timeout(WAIT, phase.wait_for(|p| *p == SessionPhase::Streaming))
            .await
            .unwrap()
            .unwrap();
        assert!(cancel.cancel());
    };

    let (result, ()) = tokio::join!(session.run(server.address()), canceller);

    assert!(matches!(result, Err(SyncError::Cancelled)));
    assert_eq!(*phase.borrow(), SessionPhase::Cancelled);
    assert!(store.journal().unwrap().is_empty());
}
