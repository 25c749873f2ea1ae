use std::time::Instant;

use mesh_protocol::{FloodingConfirmation, FloodingHello, Metric, PeerAddress};
use mesh_state::*;

struct Peer {
    stats: StatsReconciler,
    registry: WorkerRegistry,
}

fn cluster(names: &[&str]) -> Vec<Peer> {
    let now = Instant::now();
    names
        .iter()
        .map(|me| {
            let mut registry = WorkerRegistry::default();
            for other in names.iter().filter(|n| *n != me) {
                registry.heartbeat_received(&PeerAddress::from(*other), now);
            }
            Peer {
                stats: StatsReconciler::new(PeerAddress::from(*me)),
                registry,
            }
        })
        .collect()
}

fn exchange_hellos(peers: &mut [Peer]) {
    let hellos: Vec<FloodingHello> = peers
        .iter_mut()
        .map(|p| {
            p.stats.commit();
            p.stats.hello(&p.registry)
        })
        .collect();
    for (i, peer) in peers.iter_mut().enumerate() {
        for (j, hello) in hellos.iter().enumerate() {
            if i != j {
                peer.stats.absorb_report(hello, &mut peer.registry);
            }
        }
    }
}

fn finalize_all(peers: &mut [Peer]) -> Vec<(usize, FloodingConfirmation)> {
    let mut out = Vec::new();
    for (i, peer) in peers.iter_mut().enumerate() {
        if let Finalize::Broadcast(conf) = peer.stats.try_finalize(&mut peer.registry) {
            out.push((i, conf));
        }
    }
    out
}

fn deliver(peers: &mut [Peer], confirmations: &[(usize, FloodingConfirmation)]) {
    for (from, conf) in confirmations {
        for (i, peer) in peers.iter_mut().enumerate() {
            if i != *from {
                peer.stats.absorb_confirmation(conf, &mut peer.registry);
            }
        }
    }
}

#[test]
fn test_three_nodes_converge_after_one_round() {
    let mut peers = cluster(&["a:7000", "b:7000", "c:7000"]);
    for p in peers.iter_mut() {
        p.stats.record(Metric::Solved, 1);
    }

    exchange_hellos(&mut peers);
    let confirmations = finalize_all(&mut peers);
    assert_eq!(confirmations.len(), 3);
    for (_, conf) in &confirmations {
        assert_eq!(conf.stats[&Metric::Solved], 3);
    }
    deliver(&mut peers, &confirmations);

    for p in &peers {
        assert_eq!(p.stats.value(Metric::Solved), 3);
        assert_eq!(p.stats.round(Metric::Solved).internal, 0);
        assert_eq!(p.stats.round(Metric::Solved).external, 0);
    }
}

#[test]
fn test_confirmation_before_own_finalize_still_converges() {
    let mut peers = cluster(&["a:7000", "b:7000", "c:7000"]);
    for p in peers.iter_mut() {
        p.stats.record(Metric::Invalid, 2);
    }
    exchange_hellos(&mut peers);

    let a = &mut peers[0];
    let Finalize::Broadcast(conf) = a.stats.try_finalize(&mut a.registry) else {
        panic!("a:7000 heard from everyone");
    };
    deliver(&mut peers, &[(0, conf)]);

    // b and c were reset by the confirmation and wait for the next round.
    for p in peers.iter_mut().skip(1) {
        assert_eq!(p.stats.try_finalize(&mut p.registry), Finalize::Pending);
    }
    for p in &peers {
        assert_eq!(p.stats.value(Metric::Invalid), 6);
    }
}

#[test]
fn test_per_node_validations_are_aggregated() {
    let mut peers = cluster(&["a:7000", "b:7000", "c:7000"]);
    for (i, p) in peers.iter_mut().enumerate() {
        p.stats.record_validations(10 * (i as u64 + 1));
    }
    exchange_hellos(&mut peers);
    let confirmations = finalize_all(&mut peers);
    deliver(&mut peers, &confirmations);

    for p in &peers {
        let snap = p.stats.stats_snapshot(&p.registry);
        assert_eq!(snap.all[&Metric::Validations], 60);
        let nodes: Vec<(&str, u64)> = snap
            .nodes
            .iter()
            .map(|n| (n.address.as_str(), n.validations))
            .collect();
        assert_eq!(nodes, vec![("c:7000", 30), ("b:7000", 20), ("a:7000", 10)]);
    }
}

#[test]
fn test_baselines_never_decrease() {
    let mut peers = cluster(&["a:7000", "b:7000", "c:7000", "d:7000"]);
    let mut last = vec![0u64; peers.len()];

    let mut check = |peers: &[Peer]| {
        for (i, p) in peers.iter().enumerate() {
            let now = p.stats.value(Metric::Validations);
            assert!(now >= last[i], "baseline went from {} to {now}", last[i]);
            last[i] = now;
        }
    };

    for round in 0..12u64 {
        for (i, p) in peers.iter_mut().enumerate() {
            // Uneven, round-dependent activity.
            p.stats.record_validations((round * 7 + i as u64 * 3) % 5);
        }

        // Alternate between full exchanges and a partial one where only
        // the first node finalizes before others hear its confirmation.
        exchange_hellos(&mut peers);
        check(&peers[..]);
        if round % 3 == 1 {
            let first = &mut peers[0];
            if let Finalize::Broadcast(conf) = first.stats.try_finalize(&mut first.registry) {
                deliver(&mut peers, &[(0, conf)]);
            }
        } else {
            let confirmations = finalize_all(&mut peers);
            check(&peers[..]);
            deliver(&mut peers, &confirmations);
        }
        check(&peers[..]);
    }
}

#[test]
fn test_node_behind_adopts_and_catches_up() {
    let mut peers = cluster(&["a:7000", "b:7000"]);
    // a has a confirmed history b has not seen.
    peers[0].stats.record(Metric::Solved, 5);
    peers[0].stats.commit();
    let mut lone = WorkerRegistry::default();
    assert_eq!(peers[0].stats.try_finalize(&mut lone), Finalize::Local);
    assert_eq!(peers[0].stats.value(Metric::Solved), 5);

    peers[1].stats.record(Metric::Solved, 1);
    exchange_hellos(&mut peers);
    // b adopted a's baseline and dropped its own round.
    assert_eq!(peers[1].stats.value(Metric::Solved), 5);
    assert_eq!(peers[1].stats.round_results(), 0);
}

#[test]
fn test_network_snapshot_lists_alive_peers() {
    let mut peers = cluster(&["a:7000", "b:7000"]);
    exchange_hellos(&mut peers);
    let a = &mut peers[0];
    if let Some(w) = a.registry.get_mut(&PeerAddress::from("b:7000")) {
        w.known_peers = vec![PeerAddress::from("a:7000")];
    }
    let snap = a.stats.network_snapshot(&a.registry);
    assert_eq!(snap.peers.len(), 2);
    assert_eq!(
        snap.peers[&PeerAddress::from("a:7000")],
        vec![PeerAddress::from("b:7000")]
    );
}
