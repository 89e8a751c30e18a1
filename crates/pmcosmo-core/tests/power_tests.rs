use approx::assert_relative_eq;
use pmcosmo_core::error::Error;
use pmcosmo_core::power::PowerSpectrum;

const TABLE: &str = "\
# k [h/Mpc]   P(k)
0.01   100.0

0.1    10.0   extra-column
1.0    1.0
10.0   0.1
";

#[test]
fn test_read_table_with_comments() {
    let ps = PowerSpectrum::from_reader(TABLE.as_bytes()).unwrap();
    assert_eq!(ps.len(), 4);
    let (lo, hi) = ps.k_range();
    assert_eq!(lo, 0.01);
    assert_eq!(hi, 10.0);
    assert_relative_eq!(ps.eval(0.1), 10.0, max_relative = 1e-12);
}

#[test]
fn test_log_log_interpolation_is_exact_for_power_laws() {
    let ps = PowerSpectrum::from_reader(TABLE.as_bytes()).unwrap();
    for &k in &[0.02, 0.3, 4.2, 9.99] {
        assert_relative_eq!(ps.eval(k), 1.0 / k, max_relative = 1e-10);
    }
}

#[test]
fn test_outside_table_is_zero() {
    let ps = PowerSpectrum::from_pairs(vec![(1.0, 2.0), (2.0, 3.0)]).unwrap();
    assert_eq!(ps.eval(0.5), 0.0);
    assert_eq!(ps.eval(2.5), 0.0);
    assert_eq!(ps.eval(0.0), 0.0);
    assert_eq!(ps.eval(-1.0), 0.0);
    assert!(ps.covers(1.0) && ps.covers(2.0));
    assert!(!ps.covers(2.1));
}

#[test]
fn test_tabulate_endpoints() {
    let ps = PowerSpectrum::tabulate(0.1, 5.0, 50, |k| k * k).unwrap();
    assert_eq!(ps.k_range(), (0.1, 5.0));
    assert_relative_eq!(ps.eval(1.234), 1.234 * 1.234, max_relative = 1e-10);
    assert!(PowerSpectrum::tabulate(1.0, 0.5, 10, |k| k).is_err());
}

#[test]
fn test_malformed_tables_are_rejected() {
    let cases = [
        ("1.0 2.0\n", "single row"),
        ("1.0 2.0\n2.0\n", "missing column"),
        ("1.0 2.0\n2.0 abc\n", "not a number"),
        ("1.0 2.0\n0.5 3.0\n", "decreasing k"),
        ("1.0 2.0\n1.0 3.0\n", "repeated k"),
        ("1.0 2.0\n2.0 -3.0\n", "negative P"),
        ("0.0 2.0\n2.0 3.0\n", "zero k"),
        ("1.0 2.0\n2.0 inf\n", "infinite P"),
        ("# nothing\n\n", "empty"),
    ];
    for (text, what) in cases {
        match PowerSpectrum::from_reader(text.as_bytes()) {
            Err(Error::FileFormat(_)) => {}
            other => panic!("{}: expected a format error, got {:?}", what, other.map(|p| p.len())),
        }
    }
}

#[test]
fn test_error_names_the_line() {
    let err = PowerSpectrum::from_reader("# header\n1.0 2.0\n0.5 1.0\n".as_bytes()).unwrap_err();
    assert!(err.to_string().contains("line 3"), "message was: {}", err);
}

#[test]
fn test_from_path() {
    let path = std::env::temp_dir().join(format!("pmcosmo-power-{}.txt", std::process::id()));
    std::fs::write(&path, TABLE).unwrap();
    let ps = PowerSpectrum::from_path(&path);
    std::fs::remove_file(&path).ok();
    assert_eq!(ps.unwrap().len(), 4);

    let missing = PowerSpectrum::from_path("/definitely/not/here.txt");
    assert!(matches!(missing, Err(Error::Io(_))));
}
