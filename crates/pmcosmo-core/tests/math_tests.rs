use glam::DVec3;
use pmcosmo_core::error::Error;
use pmcosmo_core::math::*;

#[test]
fn test_wrap_periodic_range() {
    for i in -1000..1000 {
        let x = i as f64 * 0.37;
        let w = wrap_periodic(x, 7.5);
        assert!((0.0..7.5).contains(&w), "wrap_periodic({}) = {} out of range", x, w);
    }
}

#[test]
fn test_wrap_position_is_identity_inside() {
    let p = DVec3::new(0.0, 3.25, 9.999);
    assert_eq!(wrap_position(p, 10.0), p);
    assert!(in_box(p, 10.0));
    assert!(!in_box(DVec3::new(10.0, 0.0, 0.0), 10.0));
    assert!(!in_box(DVec3::new(f64::INFINITY, 0.0, 0.0), 10.0));
}

#[test]
fn test_signed_mode_odd_grid() {
    let modes: Vec<i64> = (0..5).map(|i| signed_mode(i, 5)).collect();
    assert_eq!(modes, vec![0, 1, 2, -2, -1]);
    assert!((0..5).all(|i| !is_nyquist(i, 5)), "odd grids have no Nyquist bin");
}

#[test]
fn test_sinc_is_even() {
    for i in 1..50 {
        let x = i as f64 * 0.1;
        assert_eq!(sinc(x), sinc(-x));
        assert!(sinc(x).abs() <= 1.0);
    }
}

#[test]
fn test_try_filled() {
    let v = try_filled(5, 2.5, "cells").unwrap();
    assert_eq!(v, vec![2.5; 5]);
    let huge = try_filled(usize::MAX, 0u64, "cells");
    assert!(matches!(huge, Err(Error::Allocation { what: "cells", .. })));
}
