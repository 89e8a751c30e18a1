use pmcosmo_core::grid::PlaneBuckets;

#[test]
fn test_buckets_group_by_plane() {
    let planes = vec![2, 0, 2, 1, 0];
    let ids = vec![10, 11, 12, 13, 14];
    let buckets = PlaneBuckets::build(3, &planes, &ids);

    assert_eq!(buckets.n_planes(), 3);
    assert_eq!(buckets.len(), 5);
    assert_eq!(buckets.bucket(0), &[1, 4], "plane 0 holds particles 1 and 4");
    assert_eq!(buckets.bucket(1), &[3]);
    assert_eq!(buckets.bucket(2), &[0, 2]);
}

#[test]
fn test_buckets_ordered_by_id() {
    let planes = vec![1, 1, 1, 0];
    let ids = vec![30, 10, 20, 5];
    let buckets = PlaneBuckets::build(2, &planes, &ids);
    let order: Vec<u64> = buckets.bucket(1).iter().map(|&i| ids[i]).collect();
    assert_eq!(order, vec![10, 20, 30], "insertion order must not matter");
}

#[test]
fn test_buckets_empty() {
    let buckets = PlaneBuckets::build(4, &[], &[]);
    assert!(buckets.is_empty());
    for p in 0..4 {
        assert!(buckets.bucket(p).is_empty(), "plane {} should be empty", p);
    }
}

#[test]
fn test_buckets_rebuild_is_independent_of_input_order() {
    let planes = vec![3, 0, 3, 3, 1];
    let ids = vec![7, 1, 4, 2, 9];
    let a = PlaneBuckets::build(4, &planes, &ids);

    let perm = [4, 2, 0, 3, 1];
    let planes_b: Vec<usize> = perm.iter().map(|&i| planes[i]).collect();
    let ids_b: Vec<u64> = perm.iter().map(|&i| ids[i]).collect();
    let b = PlaneBuckets::build(4, &planes_b, &ids_b);

    for p in 0..4 {
        let ia: Vec<u64> = a.bucket(p).iter().map(|&i| ids[i]).collect();
        let ib: Vec<u64> = b.bucket(p).iter().map(|&i| ids_b[i]).collect();
        assert_eq!(ia, ib, "plane {} differs", p);
    }
}
