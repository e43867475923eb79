//! End-to-end fusion tests over small networks.

use approx::assert_relative_eq;
use ddf_core::{
    AgentId, CentralizedFilter, CommunicationSchedule, FusionConfig, FusionError, FusionNetwork,
    FusionNode, InformationState, LinearGaussianModel, Measurement, RecordedMeasurements, TargetId,
};
use nalgebra::{DMatrix, DVector, SymmetricEigen};
use proptest::prelude::*;

const TARGET: TargetId = TargetId(0);

fn dynamics(process_variance: f64) -> LinearGaussianModel {
    LinearGaussianModel::constant_position(2, process_variance, 1.0, 1.0).unwrap()
}

fn sensor(base: &LinearGaussianModel, r: [f64; 2]) -> LinearGaussianModel {
    base.with_observation_noise(DMatrix::from_diagonal(&DVector::from_row_slice(&r)))
        .unwrap()
}

/// Deterministic, agent-dependent measurements around `truth`.
fn wobbly_log(agents: &[u32], steps: u64, truth: [f64; 2], amplitude: f64) -> RecordedMeasurements {
    let mut log = RecordedMeasurements::new();
    for &a in agents {
        for step in 1..=steps {
            let phase = 1.3 * step as f64 + a as f64;
            let z = DVector::from_vec(vec![
                truth[0] + amplitude * phase.sin(),
                truth[1] + amplitude * (0.7 * phase).cos(),
            ]);
            log.insert(AgentId(a), TARGET, Measurement::new(step, z));
        }
    }
    log
}

fn network(
    base: &LinearGaussianModel,
    noise: &[(u32, [f64; 2])],
    schedule: CommunicationSchedule,
    config: FusionConfig,
) -> FusionNetwork {
    let mut network = FusionNetwork::new(schedule, config);
    for &(id, r) in noise {
        let mut node = FusionNode::new(AgentId(id), format!("seeker-{id}"));
        node.track_target(TARGET, sensor(base, r)).unwrap();
        network.add_node(node);
    }
    network.establish_channels().unwrap();
    network
}

fn centralized(base: &LinearGaussianModel, noise: &[(u32, [f64; 2])]) -> CentralizedFilter {
    let mut filter = CentralizedFilter::new(TARGET, base.clone());
    for &(id, r) in noise {
        filter.add_sensor(AgentId(id), sensor(base, r)).unwrap();
    }
    filter
}

fn latest(network: &FusionNetwork, id: u32) -> InformationState {
    network.node(AgentId(id)).unwrap().latest(TARGET).unwrap().clone()
}

#[test]
fn two_agents_match_centralized_filter() {
    let base = dynamics(0.5);
    let noise = [(1, [10.0, 15.0]), (2, [30.0, 20.0])];
    let mut log = wobbly_log(&[1, 2], 30, [30.0, 0.0], 3.0);

    let schedule = CommunicationSchedule::chain(&[AgentId(1), AgentId(2)]).unwrap();
    let mut net = network(&base, &noise, schedule, FusionConfig::default());
    let mut central = centralized(&base, &noise);

    for step in 1..=30 {
        net.run_round(step, &mut log).unwrap();
        let reference = central.step(&mut log, step).unwrap().clone();

        for id in [1, 2] {
            let fused = latest(&net, id);
            assert_eq!(fused.step, step);
            assert_relative_eq!(
                fused.matrix,
                reference.matrix,
                epsilon = 1e-9,
                max_relative = 1e-9
            );
            assert_relative_eq!(
                fused.vector,
                reference.vector,
                epsilon = 1e-9,
                max_relative = 1e-9
            );
        }
    }
    assert_eq!(net.messages_sent(), 60);
}

#[test]
fn chain_counts_every_measurement_once() {
    let base = dynamics(1e-9);
    let noise = [
        (1, [10.0, 12.0]),
        (2, [20.0, 8.0]),
        (3, [30.0, 16.0]),
        (4, [40.0, 4.0]),
        (5, [50.0, 24.0]),
    ];
    let ids: Vec<AgentId> = (1..=5).map(AgentId).collect();
    let steps = 20;
    let mut log = wobbly_log(&[1, 2, 3, 4, 5], steps, [30.0, 0.0], 2.0);

    let mut net = network(
        &base,
        &noise,
        CommunicationSchedule::chain(&ids).unwrap(),
        FusionConfig::default(),
    );
    let mut central = centralized(&base, &noise);

    for step in 1..=steps {
        net.run_round(step, &mut log).unwrap();
        central.step(&mut log, step).unwrap();
    }

    // Information from an agent d hops away arrives d - 1 rounds late
    let k = steps as f64;
    for &(i, _) in &noise {
        for axis in 0..2 {
            let expected: f64 = noise
                .iter()
                .map(|&(j, r)| {
                    let hops = (i as i64 - j as i64).unsigned_abs() as f64;
                    let rounds = if hops == 0.0 { k } else { (k - hops + 1.0).max(0.0) };
                    rounds / r[axis]
                })
                .sum();
            let fused = latest(&net, i);
            assert_relative_eq!(fused.matrix[(axis, axis)], expected, max_relative = 1e-6);
        }
    }

    // Nobody is more confident than the centralized filter
    let ceiling = central.latest().matrix.clone();
    for &(i, _) in &noise {
        let slack = &ceiling - &latest(&net, i).matrix;
        let eigen = SymmetricEigen::new(slack);
        assert!(eigen.eigenvalues.iter().all(|&v| v > -1e-6));
    }

    // The middle of the chain is one hop from everyone but the ends
    let middle = latest(&net, 3).to_estimate().unwrap();
    assert!((middle.mean[0] - 30.0).abs() < 1.0);
}

#[test]
fn naive_fusion_is_overconfident() {
    // Adding the neighbor's whole posterior every round instead of the
    // novel part: the shared information gets counted again each time.
    let base = dynamics(1e-9);
    let m1 = sensor(&base, [10.0, 10.0]);
    let m2 = sensor(&base, [10.0, 10.0]);
    let noise = [(1, [10.0, 10.0]), (2, [10.0, 10.0])];
    let mut log = wobbly_log(&[1, 2], 5, [0.0, 0.0], 1.0);
    let mut central = centralized(&base, &noise);

    let mut post_1 = InformationState::zeros(0, 2);
    let mut post_2 = InformationState::zeros(0, 2);
    for step in 1..=5 {
        let z1 = log.get(AgentId(1), TARGET, step).unwrap().clone();
        let z2 = log.get(AgentId(2), TARGET, step).unwrap().clone();
        let local_1 = ddf_core::information_filter::run(&m1, &post_1, &z1).unwrap();
        let local_2 = ddf_core::information_filter::run(&m2, &post_2, &z2).unwrap();
        post_1 = local_1.sum(&local_2).unwrap();
        post_2 = local_2.sum(&local_1).unwrap();
        central.step(&mut log, step).unwrap();
    }

    assert!(post_1.matrix[(0, 0)] > 1.5 * central.latest().matrix[(0, 0)]);
}

#[test]
fn reruns_are_bit_identical() {
    let base = dynamics(0.01);
    let noise = [
        (1, [10.0, 12.0]),
        (2, [20.0, 8.0]),
        (3, [30.0, 16.0]),
        (4, [40.0, 4.0]),
        (5, [50.0, 24.0]),
    ];
    let ids: Vec<AgentId> = (1..=5).map(AgentId).collect();

    let run = || {
        let mut log = wobbly_log(&[1, 2, 3, 4, 5], 15, [-4.0, 9.0], 5.0);
        let mut net = network(
            &base,
            &noise,
            CommunicationSchedule::chain(&ids).unwrap(),
            FusionConfig::default(),
        );
        for step in 1..=15 {
            net.run_round(step, &mut log).unwrap();
        }
        net.into_nodes()
            .into_values()
            .map(|node| node.history(TARGET).unwrap().to_vec())
            .collect::<Vec<_>>()
    };

    assert_eq!(run(), run());
}

#[test]
fn stationary_target_two_seekers() {
    // Seekers at (-30,-30) and (-20,10) observe a hider at (30,0) through
    // sensors of different quality. Measurements are noiseless.
    let base = dynamics(1e-6);
    let noise = [(1, [10.0, 15.0]), (2, [30.0, 20.0])];
    let mut log = wobbly_log(&[1, 2], 100, [30.0, 0.0], 0.0);

    let schedule = CommunicationSchedule::chain(&[AgentId(1), AgentId(2)]).unwrap();
    let mut net = network(&base, &noise, schedule, FusionConfig::default());

    let mut previous = [0.0_f64; 2];
    for step in 1..=100 {
        net.run_round(step, &mut log).unwrap();

        for (slot, id) in [1, 2].into_iter().enumerate() {
            let info = latest(&net, id);
            let trace = info.matrix.trace();
            assert!(trace > previous[slot], "information must grow at step {step}");
            previous[slot] = trace;
        }
    }

    for id in [1, 2] {
        let node = net.node(AgentId(id)).unwrap();
        let estimate = node.estimate(TARGET).unwrap();
        assert_relative_eq!(estimate.mean[0], 30.0, epsilon = 1e-6);
        assert_relative_eq!(estimate.mean[1], 0.0, epsilon = 1e-6);

        let early = node.history(TARGET).unwrap()[1].to_estimate().unwrap();
        assert!(estimate.two_sigma(0).unwrap() < early.two_sigma(0).unwrap());
        assert_eq!(node.history(TARGET).unwrap().len(), 101);
    }
}

#[test]
fn sparse_communication_catches_up() {
    let base = dynamics(1e-9);
    let noise = [(1, [10.0, 15.0]), (2, [30.0, 20.0])];
    let mut log = wobbly_log(&[1, 2], 9, [5.0, 5.0], 1.0);

    let schedule = CommunicationSchedule::chain(&[AgentId(1), AgentId(2)]).unwrap();
    let config = FusionConfig::default().with_communication_interval(3);
    let mut net = network(&base, &noise, schedule, config);
    let mut central = centralized(&base, &noise);

    for step in 1..=9 {
        let report = net.run_round(step, &mut log).unwrap();
        central.step(&mut log, step).unwrap();
        assert_eq!(report.communicated, step % 3 == 0);

        let fused = latest(&net, 1);
        if report.communicated {
            assert_relative_eq!(fused.matrix, central.latest().matrix, max_relative = 1e-6);
            assert_relative_eq!(
                fused.vector,
                central.latest().vector,
                epsilon = 1e-9,
                max_relative = 1e-6
            );
        } else {
            assert!(fused.matrix[(0, 0)] < central.latest().matrix[(0, 0)]);
        }
    }

    let channel = net.node(AgentId(1)).unwrap().channel(AgentId(2), TARGET).unwrap();
    assert_eq!(channel.exchanges(), 3);
    assert_eq!(channel.common().step, 9);
}

#[test]
fn unconnected_control_seeker_keeps_local_estimate() {
    let base = dynamics(1e-9);
    let mut control = FusionNode::new(AgentId(9), "control");
    control.track_target(TARGET, sensor(&base, [10.0, 15.0])).unwrap();
    let mut log = wobbly_log(&[9], 10, [30.0, 0.0], 0.0);

    for step in 1..=10 {
        control.local_update(&mut log, step).unwrap();
        control.commit_local().unwrap();
    }

    let info = control.latest(TARGET).unwrap();
    assert_relative_eq!(info.matrix[(0, 0)], 1.0, max_relative = 1e-6);
    assert_relative_eq!(info.matrix[(1, 1)], 10.0 / 15.0, max_relative = 1e-6);
}

#[test]
fn per_target_filters_stay_independent() {
    const DRIFTER: TargetId = TargetId(1);
    let still = dynamics(0.5);
    let drifting = LinearGaussianModel::constant_velocity(1.0, 0.1, 1.0).unwrap();
    let noise = [(1, [10.0, 15.0], [4.0, 9.0]), (2, [30.0, 20.0], [12.0, 6.0])];

    let mut log = wobbly_log(&[1, 2], 20, [30.0, 0.0], 3.0);
    for &(a, ..) in &noise {
        for step in 1..=20u64 {
            let t = step as f64;
            let phase = 0.9 * t + a as f64;
            let z = DVector::from_vec(vec![t + 2.0 * phase.cos(), 0.5 * t - 2.0 * phase.sin()]);
            log.insert(AgentId(a), DRIFTER, Measurement::new(step, z));
        }
    }

    let schedule = CommunicationSchedule::chain(&[AgentId(1), AgentId(2)]).unwrap();
    let mut net = FusionNetwork::new(schedule, FusionConfig::default());
    let mut still_central = CentralizedFilter::new(TARGET, still.clone());
    let mut drifting_central = CentralizedFilter::new(DRIFTER, drifting.clone());
    for &(id, still_r, drifting_r) in &noise {
        let mut node = FusionNode::new(AgentId(id), format!("seeker-{id}"));
        node.track_target(TARGET, sensor(&still, still_r)).unwrap();
        node.track_target(DRIFTER, sensor(&drifting, drifting_r)).unwrap();
        net.add_node(node);
        still_central.add_sensor(AgentId(id), sensor(&still, still_r)).unwrap();
        drifting_central.add_sensor(AgentId(id), sensor(&drifting, drifting_r)).unwrap();
    }
    net.establish_channels().unwrap();

    for step in 1..=20 {
        let mut outbox = Vec::new();
        for (id, peer) in [(1, 2), (2, 1)] {
            let node = net.node_mut(AgentId(id)).unwrap();
            node.local_update(&mut log, step).unwrap();
            let sent = node.send().unwrap();

            // One message per (target, neighbor), addressed to the peer
            assert_eq!(sent.len(), 2);
            let targets: Vec<TargetId> = sent.iter().map(|m| m.target).collect();
            assert_eq!(targets, vec![TARGET, DRIFTER]);
            for message in &sent {
                assert_eq!(message.from, AgentId(id));
                assert_eq!(message.to, AgentId(peer));
                assert_eq!(message.step, step);
                let dim = if message.target == DRIFTER { 4 } else { 2 };
                assert_eq!(message.vector.len(), dim);
            }
            outbox.extend(sent);
        }

        let inboxes = net.route(outbox).unwrap();
        for (id, inbox) in inboxes {
            net.node_mut(id).unwrap().receive_and_fuse(inbox).unwrap();
        }

        let references = [
            (TARGET, still_central.step(&mut log, step).unwrap().clone()),
            (DRIFTER, drifting_central.step(&mut log, step).unwrap().clone()),
        ];
        for (id, peer) in [(1, 2), (2, 1)] {
            let node = net.node(AgentId(id)).unwrap();
            for (target, reference) in &references {
                let channel = node.channel(AgentId(peer), *target).unwrap();
                assert_eq!(channel.exchanges(), step);

                let fused = node.latest(*target).unwrap();
                assert_eq!(fused.step, step);
                assert_eq!(fused.dim(), reference.dim());
                assert_relative_eq!(
                    fused.matrix,
                    reference.matrix,
                    epsilon = 1e-8,
                    max_relative = 1e-8
                );
                assert_relative_eq!(
                    fused.vector,
                    reference.vector,
                    epsilon = 1e-8,
                    max_relative = 1e-8
                );
            }
        }
    }

    // Velocity is observable through position alone once information flows
    let estimate = net.node(AgentId(1)).unwrap().estimate(DRIFTER).unwrap();
    assert_eq!(estimate.mean.len(), 4);
    assert_eq!(net.node(AgentId(2)).unwrap().estimate(TARGET).unwrap().mean.len(), 2);
}

#[test]
fn triangle_of_seekers_is_rejected() {
    let triangle = [(AgentId(1), AgentId(2)), (AgentId(2), AgentId(3)), (AgentId(3), AgentId(1))];
    assert!(matches!(
        CommunicationSchedule::from_edges(triangle),
        Err(FusionError::CyclicTopology { .. })
    ));

    let mut schedule = CommunicationSchedule::chain(&[AgentId(1), AgentId(2), AgentId(3)]).unwrap();
    assert_eq!(
        schedule.add_edge(AgentId(1), AgentId(3)),
        Err(FusionError::CyclicTopology {
            a: AgentId(1),
            b: AgentId(3)
        })
    );
    assert_eq!(schedule.edge_count(), 2);
}

proptest! {
    #[test]
    fn information_addition_matches_covariance_fusion(
        r1 in prop::array::uniform2(0.5f64..50.0),
        r2 in prop::array::uniform2(0.5f64..50.0),
        z1 in prop::array::uniform2(-100.0f64..100.0),
        z2 in prop::array::uniform2(-100.0f64..100.0),
    ) {
        let base = dynamics(1.0);
        let m1 = sensor(&base, r1);
        let m2 = sensor(&base, r2);
        let z1 = DVector::from_row_slice(&z1);
        let z2 = DVector::from_row_slice(&z2);

        let mut info = InformationState::zeros(1, 2);
        for (model, z) in [(&m1, &z1), (&m2, &z2)] {
            let (y, big_y) =
                ddf_core::information_filter::observation_information(model, z).unwrap();
            info.add_information(&y, &big_y).unwrap();
        }
        let fused = info.to_estimate().unwrap();

        // Covariance form: start from sensor 1, Kalman-update with sensor 2
        let p1 = m1.r().clone();
        let gain = &p1 * (&p1 + m2.r()).try_inverse().unwrap();
        let mean = &z1 + &gain * (&z2 - &z1);
        let cov = (DMatrix::identity(2, 2) - &gain) * &p1;

        for i in 0..2 {
            prop_assert!((fused.mean[i] - mean[i]).abs() < 1e-8 * (1.0 + mean[i].abs()));
            let tolerance = 1e-9 * (1.0 + cov[(i, i)]);
            prop_assert!((fused.covariance[(i, i)] - cov[(i, i)]).abs() < tolerance);
        }
    }
}
