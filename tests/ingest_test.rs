mod common;

use approx::assert_relative_eq;
use camino::Utf8Path;
use common::{assert_grid, assert_shapes, reader, row, OiFile, A, B, C, D, WL};
use oidata::ingest::{load_file, LoadOptions};
use oidata::reader::memory::MemoryReader;
use oidata::station::Orientation;
use oidata::tables::{Category, Formula};
use oidata::{Dataset, OifitsError, OifitsWarning};

fn load(reader: &MemoryReader, options: &LoadOptions) -> Result<Vec<Dataset>, OifitsError> {
    load_file(reader, Utf8Path::new("a.fits"), options)
}

fn load_one(file: OiFile) -> Dataset {
    let r = reader(vec![("a.fits", file)]);
    let mut datasets = load(&r, &LoadOptions::default()).unwrap();
    assert_eq!(datasets.len(), 1);
    datasets.remove(0)
}

#[test]
fn test_triangle_with_all_baselines() {
    let ds = load_one(
        OiFile::new("PIONIER", &WL)
            .vis2(&[
                row(&[A, B], 1.0, 0.5),
                row(&[B, C], 1.0, 0.6),
                row(&[C, A], 1.0, 0.7),
            ])
            .t3(&[row(&[A, B, C], 1.0, 0.9)]),
    );

    assert_eq!(ds.instrument, "PIONIER");
    assert_eq!(ds.target, "HD1");
    assert_grid(&ds.wavelengths, &WL);
    assert_grid(&ds.bandwidths, &[0.05; 3]);
    assert_eq!(ds.telescopes, vec!["A", "B", "C"]);
    assert_eq!(ds.baselines, vec!["AB", "BC", "CA"]);
    assert_eq!(ds.triangles, vec!["ABC"]);
    assert!(ds.warnings.is_empty());
    assert_relative_eq!(ds.vis2["BC"].v2[(0, 2)], 0.6);

    let Some(Formula::Triangle(f)) = &ds.t3["ABC"].formula else {
        panic!("triangle formula expected");
    };
    assert_eq!(f.category, Category::Vis2);
    let names: Vec<&str> = f.legs.iter().map(|l| l.baseline.as_str()).collect();
    assert_eq!(names, vec!["AB", "BC", "CA"]);
    assert!(f.legs.iter().all(|l| l.orientation == Orientation::Forward));
    assert_eq!(f.rows, [vec![0], vec![0], vec![0]]);
    assert_shapes(&ds);
}

#[test]
fn test_reversed_leg() {
    let ds = load_one(
        OiFile::new("PIONIER", &WL)
            .vis2(&[
                row(&[A, B], 1.0, 0.5),
                row(&[C, B], 1.0, 0.6),
                row(&[C, A], 1.0, 0.7),
            ])
            .t3(&[row(&[A, B, C], 1.0, 0.9)]),
    );
    let Some(Formula::Triangle(f)) = &ds.t3["ABC"].formula else {
        panic!("triangle formula expected");
    };
    assert_eq!(f.legs[1].baseline, "CB");
    assert_eq!(f.legs[1].orientation, Orientation::Reverse);
    assert_eq!(f.legs[1].sign(), -1.0);
    assert!(!ds.vis2.contains_key("BC"));
}

#[test]
fn test_missing_baseline_fabricated() {
    let ds = load_one(
        OiFile::new("PIONIER", &WL)
            .vis2(&[row(&[A, B], 1.0, 0.5), row(&[B, C], 1.0, 0.6)])
            .t3(&[row(&[A, B, C], 1.0, 0.9)]),
    );

    assert!(ds.warnings.contains(&OifitsWarning::MissingBaseline {
        triangle: "ABC".into(),
        baseline: "CA".into(),
    }));
    let ca = &ds.vis2["CA"];
    assert_eq!(ca.fabricated, vec![true]);
    assert!(ca.flag.iter().all(|&f| f));
    assert!(ca.v2.iter().all(|&v| v == 0.0));
    assert!(ca.ev2.iter().all(|&e| e == 1.0));
    // third leg of the triangle: -(u1+u2), -(v1+v2)
    assert_relative_eq!(ca.u[0], -30.0);
    assert_relative_eq!(ca.v[0], -10.0);
    assert_eq!(ds.baselines, vec!["AB", "BC", "CA"]);
    assert_shapes(&ds);
}

#[test]
fn test_missing_epoch_gets_placeholder_row() {
    let ds = load_one(
        OiFile::new("PIONIER", &WL)
            .vis2(&[
                row(&[A, B], 1.0, 0.5),
                row(&[B, C], 1.0, 0.6),
                row(&[C, A], 1.0, 0.7),
            ])
            .t3(&[row(&[A, B, C], 1.0, 0.9), row(&[A, B, C], 2.0, 0.9)]),
    );

    let missing = ds
        .warnings
        .iter()
        .filter(|w| matches!(w, OifitsWarning::MissingEpochs { .. }))
        .count();
    assert_eq!(missing, 3);
    assert_eq!(ds.vis2["AB"].mjd, vec![1.0, 2.0]);
    assert_eq!(ds.vis2["AB"].fabricated, vec![false, true]);
    assert_eq!(
        ds.t3["ABC"].formula.as_ref().map(|f| f.rows().clone()),
        Some([vec![0, 1], vec![0, 1], vec![0, 1]])
    );
    assert_shapes(&ds);
}

#[test]
fn test_target_aliases() {
    let file = OiFile::new("PIONIER", &WL)
        .target(2, "HD1")
        .target(3, "HD2")
        .vis2(&[
            row(&[A, B], 1.0, 0.5),
            row(&[A, B], 2.0, 0.5).target(2),
            row(&[A, B], 3.0, 0.5).target(3),
        ]);
    let r = reader(vec![("a.fits", file)]);

    assert!(matches!(
        load(&r, &LoadOptions::default()),
        Err(OifitsError::Configuration(_))
    ));
    assert!(matches!(
        load(&r, &LoadOptions::builder().target("HD3").build().unwrap()),
        Err(OifitsError::Configuration(_))
    ));

    let ds = load(&r, &LoadOptions::builder().target("HD1").build().unwrap()).unwrap();
    assert_eq!(ds[0].vis2["AB"].mjd, vec![1.0, 2.0]);
    let ds = load(&r, &LoadOptions::builder().target("HD2").build().unwrap()).unwrap();
    assert_eq!(ds[0].vis2["AB"].mjd, vec![3.0]);
}

#[test]
fn test_extension_without_target_rows_is_skipped() {
    let file = OiFile::new("PIONIER", &WL)
        .target(2, "HD2")
        .vis2(&[row(&[A, B], 1.0, 0.5)])
        .vis2(&[row(&[C, D], 1.0, 0.5).target(2)]);
    let r = reader(vec![("a.fits", file)]);
    let ds = load(&r, &LoadOptions::builder().target("HD1").build().unwrap()).unwrap();

    assert_eq!(ds[0].vis2.len(), 1);
    assert_eq!(
        ds[0].warnings,
        vec![OifitsWarning::DataAbsent {
            extension: "OI_VIS2".into(),
            hdu: 5,
            target: "HD1".into(),
        }]
    );
}

#[test]
fn test_rows_accumulate_across_extensions() {
    let ds = load_one(
        OiFile::new("PIONIER", &WL)
            .vis2(&[row(&[A, B], 2.0, 0.5), row(&[C, D], 2.0, 0.6)])
            .vis2(&[row(&[A, B], 1.0, 0.7)]),
    );
    let ab = &ds.vis2["AB"];
    assert_eq!(ab.mjd, vec![2.0, 1.0]);
    assert_relative_eq!(ab.v2[(1, 0)], 0.7);
    assert_eq!(ab.u_wl.shape(), (2, 3));
    assert_relative_eq!(ab.u_wl[(1, 0)], 10.0 / 2.0);
    assert_eq!(ds.configurations.len(), 2);
    assert_shapes(&ds);
}

#[test]
fn test_non_finite_samples_are_flagged() {
    let ds = load_one(
        OiFile::new("PIONIER", &WL)
            .vis2(&[row(&[A, B], 1.0, f64::NAN), row(&[A, B], 2.0, 0.5).flags(&[true, false, false])]),
    );
    let ab = &ds.vis2["AB"];
    assert!(ab.flag.row(0).iter().all(|&f| f));
    assert!(ab.flag[(1, 0)]);
    assert!(!ab.flag[(1, 1)]);
}

#[test]
fn test_instrument_selection() {
    let file = OiFile::new("SC", &WL)
        .vis2(&[row(&[A, B], 1.0, 0.5)])
        .instrument("FT", &[2.0, 2.2])
        .vis2(&[row(&[A, B], 1.0, 0.8), row(&[A, C], 1.0, 0.8)]);
    let r = reader(vec![("a.fits", file)]);

    let all = load(&r, &LoadOptions::default()).unwrap();
    assert_eq!(
        all.iter().map(|d| d.instrument.as_str()).collect::<Vec<_>>(),
        vec!["SC", "FT"]
    );
    assert_eq!(all[1].n_channels(), 2);
    assert_eq!(all[1].vis2.len(), 2);
    assert_eq!(all[0].vis2.len(), 1);

    let ft = load(&r, &LoadOptions::builder().instrument("FT").build().unwrap()).unwrap();
    assert_eq!(ft.len(), 1);
    assert_eq!(ft[0], all[1]);

    assert!(matches!(
        load(&r, &LoadOptions::builder().instrument("XX").build().unwrap()),
        Err(OifitsError::Configuration(_))
    ));
}

#[test]
fn test_missing_target_table() {
    let mut extensions = OiFile::new("PIONIER", &WL)
        .vis2(&[row(&[A, B], 1.0, 0.5)])
        .build();
    extensions.remove(1);
    let r = MemoryReader::new().with_file("a.fits", extensions);
    assert!(matches!(
        load(&r, &LoadOptions::default()),
        Err(OifitsError::Format(_))
    ));
}

#[test]
fn test_binning() {
    let wl = [2.0, 2.1, 2.2, 2.3, 2.4, 2.5];
    let r = reader(vec![(
        "a.fits",
        OiFile::new("PIONIER", &wl).vis2(&[row(&[A, B], 1.0, 0.5)]),
    )]);
    let ds = load(&r, &LoadOptions::builder().binning(2).build().unwrap())
        .unwrap()
        .remove(0);

    assert_eq!(ds.binning, Some(2));
    assert_grid(&ds.wavelengths, &[2.0, 2.25, 2.5]);
    assert_grid(&ds.bandwidths, &[0.1; 3]);
    let ab = &ds.vis2["AB"];
    assert_eq!(ab.v2.shape(), (1, 3));
    for j in 0..3 {
        assert_relative_eq!(ab.v2[(0, j)], 0.5, epsilon = 1e-12);
        assert_relative_eq!(ab.ev2[(0, j)], 0.01, epsilon = 1e-12);
        assert!(!ab.flag[(0, j)]);
        assert_relative_eq!(ab.u_wl[(0, j)], 10.0 / ds.wavelengths[j]);
    }
    assert_shapes(&ds);
}

#[test]
fn test_telluric_correction() {
    let file = OiFile::new("GRAVITY_SC", &WL)
        .flux(&[row(&[A], 1.0, 10.0)])
        .tellurics(&[1.0, 0.5, 1.0]);
    let ds = load_one(file);
    let a = &ds.flux["A"];
    assert_grid(&ds.telluric, &[1.0, 0.5, 1.0]);
    assert_relative_eq!(a.flux[(0, 1)], 20.0);
    assert_relative_eq!(a.flux[(0, 0)], 10.0);
    assert_relative_eq!(a.raw_flux[(0, 1)], 10.0);
    assert!(ds.to_string().ends_with("TELLURICS: true"));

    // an override replaces the extension
    let r = reader(vec![(
        "a.fits",
        OiFile::new("GRAVITY_SC", &WL)
            .flux(&[row(&[A], 1.0, 10.0)])
            .tellurics(&[1.0, 0.5, 1.0]),
    )]);
    let options = LoadOptions::builder()
        .telluric(vec![0.8; 3])
        .build()
        .unwrap();
    let ds = load(&r, &options).unwrap().remove(0);
    assert_relative_eq!(ds.flux["A"].flux[(0, 0)], 12.5);

    let options = LoadOptions::builder()
        .telluric(vec![0.8; 4])
        .build()
        .unwrap();
    assert!(matches!(
        load(&r, &options),
        Err(OifitsError::InvalidLoadParameter(_))
    ));
}

#[test]
fn test_gravity_flux_column() {
    let ds = load_one(OiFile::new("GRAVITY_SC", &WL).flux_in("FLUX", &[row(&[B], 1.0, 3.0)]));
    assert_eq!(ds.telescopes, vec!["B"]);
    assert_relative_eq!(ds.flux["B"].flux[(0, 2)], 3.0);
}

#[test]
fn test_header_products() {
    let file = OiFile::new("GRAVITY_SC", &WL)
        .card("ESO PRO REC1 PIPE ID", "gravity/1.6.4")
        .vis2(&[row(&[A, B], 1.0, 0.5)]);
    let r = reader(vec![("a.fits", file)]);

    let ds = load(&r, &LoadOptions::default()).unwrap().remove(0);
    assert_eq!(ds.pipeline, "gravity/1.6.4");
    assert!(ds.header.is_none());
    assert!(ds.environment.is_none());

    let options = LoadOptions::builder().include_header(true).build().unwrap();
    let ds = load(&r, &options).unwrap().remove(0);
    assert_eq!(
        ds.header.as_ref().and_then(|h| h.get_str("ESO PRO REC1 PIPE ID")),
        Some("gravity/1.6.4")
    );
}

#[test]
fn test_median_filter() {
    let r = reader(vec![(
        "a.fits",
        OiFile::new("PIONIER", &WL).vis2(&[row(&[A, B], 1.0, 0.5)]),
    )]);
    let options = LoadOptions::builder().median_filter(2).build().unwrap();
    let ds = load(&r, &options).unwrap().remove(0);
    let ab = &ds.vis2["AB"];
    // zero padding does not move a constant signal away from its value
    assert_relative_eq!(ab.v2[(0, 0)], 0.5);
    assert_relative_eq!(ab.v2[(0, 1)], 0.5);
    assert_relative_eq!(ab.ev2[(0, 1)], 0.01 / 3.0_f64.sqrt());
}
