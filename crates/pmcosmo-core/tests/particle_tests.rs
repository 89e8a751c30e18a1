mod common;

use glam::DVec3;
use pmcosmo_core::cosmology::Cosmology;
use pmcosmo_core::error::Error;
use pmcosmo_core::lpt::set_zeldovich_force;
use pmcosmo_core::particle::{Group, ParticleEnsemble};
use proptest::prelude::*;

fn ensemble_with(n: usize, capacity: usize) -> ParticleEnsemble {
    let mut e = ParticleEnsemble::allocate(capacity, 10.0).unwrap();
    let positions: Vec<DVec3> = (0..n).map(|i| DVec3::splat(i as f64 * 0.1)).collect();
    e.append(&positions).unwrap();
    e
}

#[test]
fn test_allocate_starts_empty() {
    let e = ParticleEnsemble::allocate(16, 64.0).unwrap();
    assert_eq!(e.len(), 0);
    assert!(e.is_empty());
    assert_eq!(e.capacity(), 16);
    assert_eq!(e.box_size(), 64.0);
    assert_eq!(e.total_count(), 0);
    assert!(e.forces().is_none(), "forces are undefined before a computation");
}

#[test]
fn test_allocate_impossible_capacity_fails() {
    let result = ParticleEnsemble::allocate(usize::MAX, 1.0);
    assert!(matches!(result, Err(Error::Allocation { .. })), "got {:?}", result.err());
}

#[test]
fn test_allocate_rejects_bad_box() {
    assert!(matches!(
        ParticleEnsemble::allocate(4, 0.0),
        Err(Error::InvalidArgument(_))
    ));
    assert!(matches!(
        ParticleEnsemble::allocate(4, f64::NAN),
        Err(Error::InvalidArgument(_))
    ));
}

#[test]
fn test_resize_past_capacity_leaves_state() {
    let mut e = ensemble_with(3, 4);
    let before = e.ids();
    let err = e.resize(5).unwrap_err();
    assert!(matches!(err, Error::CapacityExceeded { requested: 5, capacity: 4 }));
    assert!(!err.is_fatal(), "capacity errors are recoverable");
    assert_eq!(e.ids(), before, "failed resize must not change the ensemble");
}

#[test]
fn test_resize_grow_assigns_fresh_ids() {
    let mut e = ensemble_with(2, 6);
    e.resize(4).unwrap();
    assert_eq!(e.ids(), vec![0, 1, 2, 3]);
    e.resize(1).unwrap();
    e.resize(3).unwrap();
    assert_eq!(e.ids(), vec![0, 4, 5], "shrinking never recycles ids");
}

#[test]
fn test_empty_append_is_noop() {
    let mut e = ensemble_with(3, 8);
    let (ids, pos, next) = (e.ids(), e.positions(), e.id_sequence().peek());
    e.append(&[]).unwrap();
    assert_eq!(e.len(), 3);
    assert_eq!(e.ids(), ids);
    assert_eq!(e.positions(), pos);
    assert_eq!(e.id_sequence().peek(), next, "empty append must not consume ids");
}

#[test]
fn test_append_past_capacity_leaves_state() {
    let mut e = ensemble_with(3, 4);
    let err = e.append(&[DVec3::ONE, DVec3::ONE]).unwrap_err();
    assert!(matches!(err, Error::CapacityExceeded { requested: 5, capacity: 4 }));
    assert_eq!(e.len(), 3, "partial appends are not allowed");
    e.append(&[DVec3::ONE]).unwrap();
    assert_eq!(e.ids(), vec![0, 1, 2, 3]);
}

#[test]
fn test_append_sets_positions_only() {
    let mut e = ParticleEnsemble::allocate(2, 10.0).unwrap();
    e.append(&[DVec3::new(1.0, 2.0, 3.0)]).unwrap();
    let p = e.particle(0).unwrap();
    assert_eq!(p.position, DVec3::new(1.0, 2.0, 3.0));
    assert_eq!(p.velocity, DVec3::ZERO);
    assert_eq!(p.displacement1, DVec3::ZERO);
    assert_eq!(p.displacement2, DVec3::ZERO);
    assert_eq!(e.group_of(0), Some(Group::Ungrouped));
}

#[test]
fn test_clear_keeps_capacity_and_id_counter() {
    let mut e = ensemble_with(3, 8);
    e.clear();
    assert_eq!(e.len(), 0);
    assert_eq!(e.capacity(), 8);
    e.append(&[DVec3::ZERO]).unwrap();
    assert_eq!(e.ids(), vec![3], "ids keep counting after clear");
}

#[test]
fn test_slice_keeps_strided_subset() {
    let e = ensemble_with(10, 10);
    assert_eq!(e.slice(0.5).unwrap().ids(), vec![0, 2, 4, 6, 8]);
    assert_eq!(e.slice(1.0).unwrap().ids(), e.ids());
    assert_eq!(e.slice(0.01).unwrap().ids(), vec![0], "a positive fraction keeps at least one");

    let s = e.slice(0.3).unwrap();
    assert_eq!(s.len(), 3);
    assert_eq!(s.capacity(), 3);
    assert_eq!(s.positions()[1], e.positions()[s.ids()[1] as usize]);
}

#[test]
fn test_slice_rejects_bad_fraction() {
    let e = ensemble_with(4, 4);
    for f in [0.0, -0.5, 1.5, f64::NAN] {
        assert!(
            matches!(e.slice(f), Err(Error::InvalidArgument(_))),
            "fraction {} should be rejected",
            f
        );
    }
}

#[test]
fn test_slice_of_empty_ensemble() {
    let e = ParticleEnsemble::allocate(4, 1.0).unwrap();
    assert!(e.slice(0.5).unwrap().is_empty());
}

#[test]
fn test_slice_and_parent_never_share_new_ids() {
    let mut e = ensemble_with(4, 8);
    let mut half = e.slice(0.5).unwrap();
    assert!(half.id_sequence().is_shared_with(e.id_sequence()));

    e.append(&[DVec3::ONE]).unwrap();
    half.clear();
    half.append(&[DVec3::ONE]).unwrap();
    assert_eq!(e.ids(), vec![0, 1, 2, 3, 4]);
    assert_eq!(half.ids(), vec![5]);

    let mut slab = e.select_slab(1.0).unwrap();
    slab.clear();
    slab.append(&[DVec3::ZERO]).unwrap();
    assert_eq!(slab.ids(), vec![6]);
}

#[test]
fn test_select_slab_uses_wrapped_z() {
    let mut e = ParticleEnsemble::allocate(4, 10.0).unwrap();
    e.append(&[
        DVec3::new(0.0, 0.0, 1.0),
        DVec3::new(0.0, 0.0, 6.0),
        DVec3::new(0.0, 0.0, -8.0),
        DVec3::new(0.0, 0.0, 12.0),
    ])
    .unwrap();
    let s = e.select_slab(0.5).unwrap();
    assert_eq!(s.ids(), vec![0, 2, 3], "z = -8 and z = 12 wrap below 5");
}

#[test]
fn test_periodic_wrapup_examples() {
    let mut e = ParticleEnsemble::allocate(3, 4.0).unwrap();
    e.append(&[
        DVec3::new(-1.0, 4.0, 9.5),
        DVec3::new(-1.0e-18, 3.999, 0.0),
        DVec3::new(-8.0, 8.0, -4.0),
    ])
    .unwrap();
    e.periodic_wrapup();
    let p = e.positions();
    assert_eq!(p[0], DVec3::new(3.0, 0.0, 1.5));
    assert_eq!(p[2], DVec3::ZERO);
    for x in p {
        for c in x.to_array() {
            assert!((0.0..4.0).contains(&c), "coordinate {} outside [0, 4)", c);
        }
    }
}

#[test]
fn test_groups_are_explicit() {
    let mut e = ensemble_with(3, 3);
    assert!(e.set_groups(vec![Group::Member(1)]).is_err());
    e.set_groups(vec![Group::Member(1), Group::Ungrouped, Group::Member(7)])
        .unwrap();
    assert_eq!(e.group_of(2), Some(Group::Member(7)));
    assert_eq!(e.group_of(3), None);
    assert_eq!(e.groups()[1], Group::Ungrouped);
}

#[test]
fn test_forces_invalidated_by_append() {
    let mut e = ensemble_with(2, 4);
    set_zeldovich_force(&mut e, &Cosmology::default(), 1.0).unwrap();
    assert_eq!(e.forces(), Some(vec![DVec3::ZERO; 2]));
    e.append(&[DVec3::ONE]).unwrap();
    assert!(e.forces().is_none(), "a changed particle set has no valid forces");
}

#[test]
fn test_node_ids_do_not_collide() {
    let ids = common::run_nodes(3, |comm| {
        let mut e = ParticleEnsemble::allocate_for_node(4, 1.0, comm.rank(), comm.size())?;
        e.append(&[DVec3::ZERO; 4])?;
        Ok(e.ids())
    });
    let mut all: Vec<u64> = ids.into_iter().flatten().collect();
    all.sort_unstable();
    assert_eq!(all, (0..12).collect::<Vec<u64>>());
}

#[test]
fn test_update_total_count_sums_nodes() {
    let totals = common::run_nodes(4, |comm| {
        let mut e = ParticleEnsemble::allocate_for_node(8, 1.0, comm.rank(), comm.size())?;
        e.resize(comm.rank() + 1)?;
        e.update_total_count(&comm)?;
        Ok(e.total_count())
    });
    assert_eq!(totals, vec![10; 4], "every node sees 1 + 2 + 3 + 4");
}

proptest! {
    #[test]
    fn prop_resize_sets_length(capacity in 0usize..64, n in 0usize..64) {
        let mut e = ParticleEnsemble::allocate(capacity, 1.0).unwrap();
        let result = e.resize(n);
        if n <= capacity {
            prop_assert!(result.is_ok());
            prop_assert_eq!(e.len(), n);
        } else {
            prop_assert!(result.is_err());
            prop_assert_eq!(e.len(), 0);
        }
    }

    #[test]
    fn prop_wrapup_lands_in_box(
        coords in proptest::collection::vec(-1.0e3f64..1.0e3, 3..30),
        box_size in 0.5f64..100.0,
    ) {
        let positions: Vec<DVec3> = coords
            .chunks_exact(3)
            .map(|c| DVec3::new(c[0], c[1], c[2]))
            .collect();
        let mut e = ParticleEnsemble::allocate(positions.len(), box_size).unwrap();
        e.append(&positions).unwrap();
        e.periodic_wrapup();
        for p in e.positions() {
            for c in p.to_array() {
                prop_assert!(c >= 0.0 && c < box_size, "{} outside [0, {})", c, box_size);
            }
        }
    }
}
