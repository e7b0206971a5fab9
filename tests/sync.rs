// Two nodes on loopback converge on the longer chain

use pow_ledger::{Ledger, Node, NodeConfig, ProofOfWork, Storage, Transaction};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::{Instant, sleep};

fn easy_ledger(storage: &Storage) -> Ledger {
    Ledger::load(storage.db())
        .unwrap()
        .with_pow(ProofOfWork::with_difficulty(8))
}

fn config(id: &str, listen_addr: &str, bootstrap: &str) -> NodeConfig {
    let mut config = NodeConfig::new(id);
    config.listen_addr = listen_addr.to_string();
    config.bootstrap = bootstrap.to_string();
    config.io_timeout = Duration::from_secs(5);
    config
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_lagging_node_catches_up() {
    let owner = [0x42; 20];

    // Node A: genesis plus three more blocks
    let storage_a = Storage::memory().unwrap();
    let ledger_a = easy_ledger(&storage_a);
    let genesis = ledger_a.create_genesis(&owner).unwrap();
    for _ in 0..3 {
        ledger_a.mine_block(vec![Transaction::coinbase(&owner, "")]).unwrap();
    }
    storage_a.utxo_set.reindex(&ledger_a).unwrap();

    // Node B: the same genesis only
    let storage_b = Storage::memory().unwrap();
    let ledger_b = easy_ledger(&storage_b);
    ledger_b.append(&genesis).unwrap();
    storage_b.utxo_set.reindex(&ledger_b).unwrap();

    let listener_a = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr_a = listener_a.local_addr().unwrap().to_string();
    let listener_b = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr_b = listener_b.local_addr().unwrap().to_string();

    let node_a = Node::new(config("a", &addr_a, &addr_a), storage_a, ledger_a);
    let node_b = Node::new(config("b", &addr_b, &addr_a), storage_b, ledger_b);

    tokio::spawn(node_a.clone().serve(listener_a));
    tokio::spawn(node_b.clone().serve(listener_b));

    let deadline = Instant::now() + Duration::from_secs(30);
    while node_b.ledger().best_height().unwrap() < 3 {
        assert!(Instant::now() < deadline, "node B did not catch up");
        sleep(Duration::from_millis(50)).await;
    }

    // Blocks arrive tip first; the UTXO set is rebuilt once the last one is in
    let deadline = Instant::now() + Duration::from_secs(10);
    while node_b.storage().utxo_set.balance(&owner).unwrap() != 40 {
        assert!(Instant::now() < deadline, "node B did not reindex");
        sleep(Duration::from_millis(50)).await;
    }

    assert_eq!(node_b.ledger().tip_hash().unwrap(), node_a.ledger().tip_hash().unwrap());
    assert_eq!(node_b.ledger().block_hashes().unwrap(), node_a.ledger().block_hashes().unwrap());

    assert!(node_a.peers().await.contains(&addr_b));
}
