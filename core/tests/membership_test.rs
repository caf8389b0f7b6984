//! Consensus-confirmed membership changes
//!
//! Registration applies the member-set change provisionally, proposes it
//! for consensus, and rolls it back explicitly when the round does not
//! accept. Bootstrap registrations (no quorum available yet) stay
//! provisional.

use meshweave_core::consensus::{
    ByzantineVote, Ed25519Signer, Ed25519Verifier, RoundStatus, VoteChoice, VoteOutcome,
    VoteSigner,
};
use meshweave_core::mesh::{MeshConfig, MeshManager, NodeAdmission, MESH_NODES_DOC};
use meshweave_core::transport::MemoryTransport;
use meshweave_core::types::{DocId, MeshNode, NodeId, Payload, RoundId, Signature};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

struct TestCluster {
    manager: Arc<MeshManager>,
    transport: Arc<MemoryTransport>,
    signers: HashMap<NodeId, Ed25519Signer>,
}

impl TestCluster {
    fn new(node: &str, membership_timeout_ms: u64) -> Self {
        let transport = Arc::new(MemoryTransport::new());
        let verifier = Arc::new(Ed25519Verifier::new());
        let mut signers = HashMap::new();
        for name in ["n-a", "n-b", "n-c", "n-d"] {
            let node_id = NodeId::from(name);
            let signer = Ed25519Signer::generate();
            verifier
                .register_key(node_id.clone(), &signer.public_key_bytes())
                .expect("register key");
            signers.insert(node_id, signer);
        }

        let mut config = MeshConfig::new(NodeId::from(node));
        config.byzantine_tolerance = true;
        config.membership_timeout_ms = membership_timeout_ms;
        let manager = Arc::new(MeshManager::new(config, transport.clone(), verifier));
        Self {
            manager,
            transport,
            signers,
        }
    }

    fn vote(&self, voter: &str, round_id: RoundId, choice: VoteChoice) -> ByzantineVote {
        let voter = NodeId::from(voter);
        let signer = self.signers.get(&voter).expect("unknown signer");
        let mut vote = ByzantineVote {
            voter,
            round_id,
            choice,
            signature: Signature::zeroed(),
            timestamp_ms: 1_000,
            reputation: 100,
        };
        vote.signature = signer.sign(&vote.signing_bytes());
        vote
    }

    async fn member_present(&self, node: &str) -> bool {
        self.manager
            .documents()
            .read()
            .await
            .set_contains(&DocId::from(MESH_NODES_DOC), &Payload::from(node))
            .expect("member set")
    }

    /// Wait until the engine broadcasts the next proposal and return its
    /// round id
    async fn next_round(&self, seen: usize) -> RoundId {
        for _ in 0..100 {
            let proposals = self.transport.sent_proposals();
            if proposals.len() > seen {
                return proposals[seen].0;
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!("no proposal was broadcast");
    }
}

#[tokio::test]
async fn test_bootstrap_registrations_stay_provisional() {
    let cluster = TestCluster::new("n-a", 200);
    cluster.manager.initialize().await.expect("initialize");

    // With fewer than three healthy nodes there is no quorum to consult
    let admission = cluster
        .manager
        .register_node(MeshNode::new(NodeId::from("n-a")))
        .await
        .expect("register");
    assert_eq!(admission, NodeAdmission::Provisional);
    let admission = cluster
        .manager
        .register_node(MeshNode::new(NodeId::from("n-b")))
        .await
        .expect("register");
    assert_eq!(admission, NodeAdmission::Provisional);

    assert!(cluster.member_present("n-a").await);
    assert!(cluster.member_present("n-b").await);
    assert!(cluster.transport.sent_proposals().is_empty());
}

#[tokio::test]
async fn test_unconfirmed_membership_change_is_rolled_back() {
    let cluster = TestCluster::new("n-a", 200);
    cluster.manager.initialize().await.expect("initialize");

    for name in ["n-a", "n-b"] {
        cluster
            .manager
            .register_node(MeshNode::new(NodeId::from(name)))
            .await
            .expect("register");
    }

    // The third registration reaches quorum size and proposes; nobody
    // votes, the round times out, and the provisional add is undone
    let admission = cluster
        .manager
        .register_node(MeshNode::new(NodeId::from("n-c")))
        .await
        .expect("register");
    assert_eq!(
        admission,
        NodeAdmission::RolledBack {
            status: RoundStatus::TimedOut
        }
    );

    assert!(!cluster.member_present("n-c").await);
    assert_eq!(cluster.manager.metrics().await.total_nodes, 2);
    assert_eq!(cluster.manager.consensus().healthy_node_count().await, 2);
}

#[tokio::test]
async fn test_accepted_membership_change_commits() {
    let cluster = TestCluster::new("n-a", 2_000);
    cluster.manager.initialize().await.expect("initialize");

    for name in ["n-a", "n-b"] {
        cluster
            .manager
            .register_node(MeshNode::new(NodeId::from(name)))
            .await
            .expect("register");
    }

    // Run the registration concurrently and vote it through
    let manager = cluster.manager.clone();
    let handle = tokio::spawn(async move {
        manager
            .register_node(MeshNode::new(NodeId::from("n-c")))
            .await
    });

    let round_id = cluster.next_round(0).await;
    // Healthy set is {n-a, n-b, n-c}: two full-weight accepts already
    // clear two-thirds of the projected weight and decide the round
    for voter in ["n-a", "n-b"] {
        assert_eq!(
            cluster
                .manager
                .receive_vote(cluster.vote(voter, round_id, VoteChoice::Accept))
                .await,
            VoteOutcome::Tallied
        );
    }

    let admission = handle.await.expect("join").expect("register");
    assert_eq!(admission, NodeAdmission::Committed);
    assert!(cluster.member_present("n-c").await);
    assert_eq!(cluster.manager.metrics().await.total_nodes, 3);
}

#[tokio::test]
async fn test_unregistration_of_unknown_node_fails() {
    let cluster = TestCluster::new("n-a", 200);
    cluster.manager.initialize().await.expect("initialize");

    let result = cluster
        .manager
        .unregister_node(&NodeId::from("ghost"))
        .await;
    assert!(matches!(
        result,
        Err(meshweave_core::Error::NodeNotRegistered(_))
    ));
}

#[tokio::test]
async fn test_unregistration_below_quorum_is_provisional() {
    let cluster = TestCluster::new("n-a", 200);
    cluster.manager.initialize().await.expect("initialize");

    for name in ["n-a", "n-b"] {
        cluster
            .manager
            .register_node(MeshNode::new(NodeId::from(name)))
            .await
            .expect("register");
    }

    let admission = cluster
        .manager
        .unregister_node(&NodeId::from("n-b"))
        .await
        .expect("unregister");
    assert_eq!(admission, NodeAdmission::Provisional);
    assert!(!cluster.member_present("n-b").await);
    assert_eq!(cluster.manager.metrics().await.total_nodes, 1);
}
