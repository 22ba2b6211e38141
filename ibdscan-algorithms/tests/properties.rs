use approx::assert_relative_eq;
use ibdscan_algorithms::window::volume_key;
use ibdscan_algorithms::{
    classify, process_events_parallel, DetectorResponse, EventProcessor, SlidingWindowClusterer,
    TimeWindowClusterer,
};
use ibdscan_core::{
    AnalysisConfig, Calibration, ClusterAccumulator, ClusteringConfig, DepositRecord, HitClass,
    ResponseConfig, ResponsePulse,
};

fn stream() -> Vec<DepositRecord> {
    let mut records = Vec::new();
    for i in 0..200 {
        let t = f64::from(i) * 17.0 + f64::from(i % 7) * 3.0;
        let volume = i % 4;
        let energy = 0.1 + f64::from(i % 5) * 0.05;
        records.push(DepositRecord::new(1, volume, 11, energy, t));
    }
    records
}

fn boundaries(clusters: &[ClusterAccumulator<DepositRecord>]) -> Vec<(i32, f64, f64, usize)> {
    clusters
        .iter()
        .map(|c| (c.value.volume_id, c.start_time, c.last_update_time, c.member_count))
        .collect()
}

fn run_gap_clusterer(
    records: &[DepositRecord],
    gap: f64,
) -> Vec<ClusterAccumulator<DepositRecord>> {
    let config = ClusteringConfig::new().with_gap(gap);
    let mut clusterer = TimeWindowClusterer::new(config, volume_key).unwrap();
    let mut out = clusterer.extend(records.iter().copied()).unwrap();
    out.extend(clusterer.flush());
    out
}

#[test]
fn test_window_clustering_is_deterministic() {
    let records = stream();
    let first = run_gap_clusterer(&records, 60.0);
    let second = run_gap_clusterer(&records, 60.0);
    assert_eq!(boundaries(&first), boundaries(&second));

    let total: usize = first.iter().map(|c| c.member_count).sum();
    assert_eq!(total, records.len());
}

#[test]
fn test_record_past_gap_starts_new_cluster() {
    let config = ClusteringConfig::new().with_gap(25.0);
    let mut clusterer = TimeWindowClusterer::ungrouped(config).unwrap();
    let mut t = 0.0;
    for _ in 0..20 {
        clusterer.add(DepositRecord::new(1, 1, 11, 1.0, t)).unwrap();
        let closed = clusterer
            .add(DepositRecord::new(1, 1, 11, 1.0, t + 25.0 + 1e-6))
            .unwrap();
        assert!(closed.is_some());
        t += 100.0;
        assert!(clusterer.add(DepositRecord::new(1, 1, 11, 1.0, t)).unwrap().is_some());
        t += 10.0;
    }
}

#[test]
fn test_sliding_window_matches_gap_variant() {
    let records = stream();
    let gap = 60.0;
    let mut reference = run_gap_clusterer(&records, gap);

    let config = ClusteringConfig::new()
        .with_gap(gap)
        .with_window_time(200.0)
        .with_scan_interval(8);
    let mut sliding = SlidingWindowClusterer::new(config, volume_key).unwrap();
    let mut sink = Vec::new();
    for record in &records {
        sliding.add(*record, &mut sink).unwrap();
    }
    sliding.flush(&mut sink);
    assert!(sliding.max_seen_time() > 0.0);

    let key = |c: &ClusterAccumulator<DepositRecord>| (c.value.volume_id, c.start_time.to_bits());
    reference.sort_by_key(key);
    sink.sort_by_key(key);
    assert_eq!(boundaries(&reference), boundaries(&sink));
}

#[test]
fn test_quenching_is_monotonic_in_energy() {
    let response = DetectorResponse::new(&Calibration::default(), ResponseConfig::default()).unwrap();
    for d in [0.0, 0.5, 2.0, 10.0, 50.0, 200.0] {
        let mut previous = 0.0;
        for step in 0..=100 {
            let energy = f64::from(step) * 0.1;
            let record = DepositRecord::new(1, 1, 2212, energy, 0.0).with_mean_dedx(d);
            let quenched = response.quench(&record);
            assert!(quenched >= previous, "d={d} E={energy}: {quenched} < {previous}");
            assert!(quenched <= energy + 1e-12);
            previous = quenched;
        }
    }
}

#[test]
fn test_psd_stays_in_unit_interval() {
    let response = DetectorResponse::new(&Calibration::default(), ResponseConfig::default()).unwrap();
    for d in [0.0, 0.01, 1.0, 30.0, 1e3, 1e6] {
        let record = DepositRecord::new(1, 1, 2212, 1.0, 0.0).with_mean_dedx(d);
        let psd = response.psd(&record);
        assert!((0.0..=1.0).contains(&psd), "d={d}: psd {psd}");
    }
}

#[test]
fn test_classification_covers_every_pulse() {
    let config = AnalysisConfig::default();
    let mut seen = [false; HitClass::COUNT];
    for volume in [-3, 0, 12, 999, 1000, 1500] {
        for energy in [0.0, 0.05, 0.1, 0.4, 0.5, 0.6, 0.61, 2.0, 50.0] {
            for dedx in [0.0, 0.1, 1.0, 10.0, 100.0] {
                let pulse = ResponsePulse {
                    volume_id: volume,
                    energy,
                    deposited_energy: energy,
                    dedx_integral: energy * dedx,
                    ..Default::default()
                };
                let class = classify(&pulse, &config);
                assert_eq!(HitClass::ALL.iter().filter(|&&c| c == class).count(), 1);
                seen[class.index()] = true;
            }
        }
    }
    assert!(seen.iter().all(|&s| s), "unreached class: {seen:?}");
}

#[test]
fn test_response_independent_of_input_order() {
    let response = DetectorResponse::new(&Calibration::default(), ResponseConfig::default()).unwrap();
    let records = vec![
        DepositRecord::new(1, 2, 11, 0.7, 3.0).with_mean_dedx(1.5),
        DepositRecord::new(1, 2, 2212, 1.2, 4.0).with_mean_dedx(40.0),
        DepositRecord::new(1, 2, 1_000_020_040, 0.3, 5.0).with_mean_dedx(90.0),
        DepositRecord::new(1, 4, 11, 0.2, 3.5).with_mean_dedx(1.5),
    ];
    let forward = response.respond(&records).unwrap();
    let mut reversed_input = records.clone();
    reversed_input.reverse();
    let backward = response.respond(&reversed_input).unwrap();

    assert_eq!(forward.len(), 2);
    for (a, b) in forward.iter().zip(&backward) {
        assert_eq!(a.volume_id, b.volume_id);
        assert_relative_eq!(a.energy, b.energy, epsilon = 1e-12);
        assert_relative_eq!(a.psd, b.psd, epsilon = 1e-12);
        assert_relative_eq!(a.time, b.time, epsilon = 1e-12);
    }
}

#[test]
fn test_parallel_batches_keep_input_order() {
    let template = EventProcessor::new(
        ClusteringConfig::default(),
        &Calibration::default(),
        ResponseConfig::default(),
        AnalysisConfig::default(),
    )
    .unwrap();

    let events: Vec<Vec<DepositRecord>> = (0..32)
        .map(|id| {
            vec![
                DepositRecord::new(id, 5, 11, 1.0, 0.0).with_mean_dedx(2.0),
                DepositRecord::new(id, 6, 11, 0.5, 10.0).with_mean_dedx(2.0),
            ]
        })
        .collect();

    let (outputs, stats) = process_events_parallel(&template, &events);
    assert_eq!(outputs.len(), 32);
    for (id, output) in outputs.iter().enumerate() {
        let output = output.as_ref().unwrap();
        assert_eq!(output.event_id, i64::try_from(id).unwrap());
        assert_eq!(output.hits.len(), 2);
    }
    assert_eq!(stats.events_processed, 32);
    assert_eq!(stats.pulses, 64);
    assert_eq!(stats.analysis.events, 32);
    assert_eq!(stats.clustering.records_seen, 64);
}
