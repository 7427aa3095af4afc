use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use paxossim_paxos::{
    Address, Body, Command, LocalExchange, Message, MessageExchange, Role, SimConfig, Simulation,
    Slot, mailbox,
};

/// Initialize tracing for tests. Call at the start of each test.
/// Uses `RUST_LOG` for filtering (defaults to "debug" for this crate).
fn init_tracing() -> impl Sized {
    use tracing::Dispatch;
    use tracing_subscriber::{EnvFilter, fmt};

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("paxossim_paxos=debug")),
        )
        .with_test_writer()
        .finish();

    // thread-local default; a global subscriber would leak across tests
    let dispatch = Dispatch::new(subscriber);
    tracing::dispatcher::set_default(&dispatch)
}

type Log = Vec<(Slot, Command)>;

/// Executed slots strictly increase and no command runs twice.
fn assert_well_formed(replica: Address, log: &Log) {
    let mut seen = HashSet::new();
    for window in log.windows(2) {
        assert!(window[0].0 < window[1].0, "{replica}: slots out of order");
    }
    for (slot, command) in log {
        assert!(seen.insert(command), "{replica}: {command} executed twice, again at {slot}");
    }
}

fn assert_prefix_consistent(logs: &[(Address, Log)]) {
    for (a, log_a) in logs {
        for (b, log_b) in logs {
            let common = log_a.len().min(log_b.len());
            assert_eq!(log_a[..common], log_b[..common], "{a} and {b} diverge");
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_single_leader_replicas_agree() {
    let _guard = init_tracing();

    let config = SimConfig {
        acceptors: 3,
        leaders: 1,
        replicas: 1,
        clients: 2,
        client_interval: Duration::from_millis(100),
        window: 5,
    };
    let mut sim = Simulation::new(config).unwrap();
    sim.start().unwrap();

    tokio::time::sleep(Duration::from_millis(1050)).await;
    sim.stop_clients();
    // paused clock: this only returns once every task is idle
    tokio::time::sleep(Duration::from_secs(1)).await;

    let logs = sim.replica_logs();
    sim.shutdown().await.unwrap();

    let (replica, log) = &logs[0];
    assert_well_formed(*replica, log);

    // every request from every client executed exactly once, in the order sent
    let mut per_client: BTreeMap<&str, Vec<u64>> = BTreeMap::new();
    for (_, command) in log {
        assert_eq!(command.op(), "OP");
        per_client
            .entry(command.client_id())
            .or_default()
            .push(command.command_id().parse().unwrap());
    }
    assert_eq!(per_client.len(), 2);
    for (client, ids) in per_client {
        assert_eq!(ids, (1..=10).collect::<Vec<u64>>(), "{client}");
    }
}

#[tokio::test(start_paused = true)]
async fn test_replicas_execute_the_same_log() {
    let _guard = init_tracing();

    let config = SimConfig {
        leaders: 1,
        ..SimConfig::with_failures(1).client_interval(Duration::from_millis(50))
    };
    let mut sim = Simulation::new(config).unwrap();
    sim.start().unwrap();

    tokio::time::sleep(Duration::from_millis(500)).await;
    sim.stop_clients();
    tokio::time::sleep(Duration::from_secs(1)).await;

    let logs = sim.replica_logs();
    sim.shutdown().await.unwrap();

    assert_eq!(logs.len(), 2);
    for (replica, log) in &logs {
        assert!(!log.is_empty(), "{replica} executed nothing");
        assert_well_formed(*replica, log);
    }
    assert_prefix_consistent(&logs);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_dueling_leaders_never_diverge() {
    let _guard = init_tracing();

    let config = SimConfig::with_failures(1)
        .clients(3)
        .client_interval(Duration::from_millis(5));
    assert_eq!(config.leaders, 2);
    let mut sim = Simulation::new(config).unwrap();
    sim.start().unwrap();

    // competing leaders may livelock; only safety is checked
    tokio::time::sleep(Duration::from_millis(300)).await;
    sim.stop_clients();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let logs = sim.replica_logs();
    sim.shutdown().await.unwrap();

    for (replica, log) in &logs {
        assert_well_formed(*replica, log);
    }
    assert_prefix_consistent(&logs);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_exchange_concurrent_senders_keep_fifo() {
    const SENDERS: u64 = 8;
    const MESSAGES: u64 = 200;

    let exchange = LocalExchange::new();
    let (inbox, mut receiver) = mailbox(exchange.next_address(Role::Replica));
    let dest = receiver.address();
    exchange.register(inbox).unwrap();

    let mut tasks = Vec::new();
    for sender in 0..SENDERS {
        let exchange = exchange.clone();
        tasks.push(tokio::spawn(async move {
            let src = exchange.next_address(Role::Client);
            // churn the registry while sending
            let (inbox, _mailbox) = mailbox(src);
            exchange.register(inbox).unwrap();
            for n in 0..MESSAGES {
                let command = Command::basic(sender.to_string(), n.to_string(), "OP");
                exchange
                    .send(dest, Message::new(src, Body::Request(command)))
                    .unwrap();
                if n % 50 == 0 {
                    tokio::task::yield_now().await;
                }
            }
            exchange.unregister(src).unwrap();
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let mut next: BTreeMap<String, u64> = BTreeMap::new();
    for _ in 0..SENDERS * MESSAGES {
        let message = receiver.recv().await.unwrap();
        let Body::Request(command) = message.body else {
            panic!("unexpected {message}");
        };
        let expected = next.entry(command.client_id().to_owned()).or_default();
        assert_eq!(command.command_id(), expected.to_string());
        *expected += 1;
    }
    assert_eq!(receiver.try_recv(), None);
    assert!(next.values().all(|&count| count == MESSAGES));
    assert!(exchange.addresses(Role::Client).is_empty());
}
