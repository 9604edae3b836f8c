// tests/matrix_tests.rs
//
// End-to-end checks on the scenario matrix and the command lines it renders.

use blkbench::runner::command_for;
use blkbench::scenario::{
    generate_matrix, numjobs_options, sequential_specs, FsKind, MatrixOptions, Mode, TestKind,
};

#[test]
fn full_matrix_covers_every_axis() {
    let specs = generate_matrix(Mode::Full, FsKind::Generic, &MatrixOptions::new(Mode::Full));
    assert_eq!(specs.len(), 480);

    let block_sizes: std::collections::BTreeSet<&str> =
        specs.iter().map(|s| s.block_size.as_str()).collect();
    assert_eq!(block_sizes.len(), 8);
    let depths: std::collections::BTreeSet<u32> = specs.iter().map(|s| s.queue_depth).collect();
    assert_eq!(
        depths.into_iter().collect::<Vec<_>>(),
        vec![1, 2, 4, 8, 16, 32]
    );
    let ratios: std::collections::BTreeSet<u32> = specs.iter().map(|s| s.rwmix_read).collect();
    assert_eq!(ratios.into_iter().collect::<Vec<_>>(), vec![0, 25, 50, 75, 100]);
}

#[test]
fn every_scenario_renders_a_runnable_command() {
    let mut specs = generate_matrix(Mode::Full, FsKind::Generic, &MatrixOptions::new(Mode::Full));
    specs.extend(sequential_specs(Mode::Full, FsKind::Generic));

    for spec in &specs {
        let argv = command_for(spec);
        assert!(!argv.is_empty(), "{}", spec.name());
        let tool = if spec.kind.is_sequential() { "dd" } else { "fio" };
        assert_eq!(argv[0], tool, "{}", spec.name());
    }
}

#[test]
fn quick_mode_respects_the_numjobs_lookup() {
    let specs = generate_matrix(Mode::Quick, FsKind::Generic, &MatrixOptions::new(Mode::Quick));
    for spec in &specs {
        let allowed = numjobs_options(spec.queue_depth);
        assert!(
            allowed.contains(&spec.numjobs),
            "{}: numjobs {} not in {:?}",
            spec.name(),
            spec.numjobs,
            allowed
        );
    }
}

#[test]
fn ninep_fallback_shapes_the_rendered_commands() {
    let specs = generate_matrix(Mode::Quick, FsKind::NineP, &MatrixOptions::new(Mode::Quick));
    for spec in &specs {
        let joined = command_for(spec).join(" ");
        assert!(joined.contains("--ioengine=psync"), "{}", spec.name());
        if spec.kind == TestKind::RandWrite {
            assert!(joined.contains("--direct=1"), "{}", spec.name());
        } else {
            assert!(joined.contains("--direct=0"), "{}", spec.name());
        }
    }
}

#[test]
fn scenario_names_are_unique_within_a_run() {
    let mut specs = sequential_specs(Mode::Full, FsKind::Generic);
    specs.extend(generate_matrix(
        Mode::Full,
        FsKind::Generic,
        &MatrixOptions::new(Mode::Full),
    ));
    let names: std::collections::HashSet<String> = specs.iter().map(|s| s.name()).collect();
    assert_eq!(names.len(), specs.len());
}
