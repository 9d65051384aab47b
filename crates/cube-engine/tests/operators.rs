//! Behaviour of the cube operators over synthetic inputs.

use std::sync::Arc;

use cube_engine::cube::{
    AggregateSpaceCube, AggregateTimeCube, ApplyPixelCube, CropCube, FillMethod, FillTimeCube,
    FilterGeomCube, FilterPixelCube, JoinBandsCube, ReduceSpaceCube, ReduceTimeCube,
    RenameBandsCube, ResamplingMethod, SelectBandsCube, SelectTimeCube, SliceAggregation,
    SliceSpaceCube, SliceTimeCube, SourceCube, WindowTimeCube,
};
use cube_engine::{
    query_points, query_timeseries, read_window, reduce_series, zonal_statistics,
    AggregatorKind, ChunkIndex, ChunkShape, Cube, CubeError, CubeRef, EdgePolicy, Polygon,
    ReducerSpec, SpaceTimePoint, SpatialExtent, TimeStep, WindowOp,
};
use test_utils::{
    assert_approx_eq, assert_values_approx_eq, daily_reference, datetime, pattern_value,
    CountingCube, FnCube, SyntheticCatalog, SyntheticReader,
};

fn series_cube(series: Vec<f64>, chunk_t: usize) -> CubeRef {
    let nt = series.len();
    Arc::new(FnCube::series(
        daily_reference(1, 1, nt, ChunkShape::new(chunk_t, 1, 1)),
        series,
    ))
}

fn full(cube: &dyn Cube) -> cube_engine::ChunkData {
    read_window(cube, &cube.reference().full_window()).unwrap()
}

#[test]
fn test_reduce_time_mean_skips_nodata() {
    // Three time chunks of one slice each; the middle one is nodata.
    let input = Arc::new(FnCube::series(
        daily_reference(2, 2, 3, ChunkShape::new(1, 2, 2)),
        vec![1.0, f64::NAN, 3.0],
    ));
    assert_eq!(input.reference().chunk_counts().0, 3);

    let reduced = ReduceTimeCube::new(
        input,
        vec![
            ReducerSpec::new(AggregatorKind::Mean, "value"),
            ReducerSpec::new(AggregatorKind::Count, "value"),
        ],
    )
    .unwrap();
    assert_eq!(reduced.bands().names(), vec!["value_mean", "value_count"]);
    assert_eq!(reduced.reference().nt, 1);

    let chunk = reduced.compute_chunk(ChunkIndex::new(0, 0, 0)).unwrap();
    assert_eq!(chunk.shape(), [2, 1, 2, 2]);
    for &v in chunk.band(0) {
        assert_approx_eq!(v, 2.0, 1e-12);
    }
    assert!(chunk.band(1).iter().all(|&c| c == 2.0));
}

#[test]
fn test_reduce_time_incremental_matches_materialised() {
    let reference = daily_reference(3, 3, 10, ChunkShape::new(3, 2, 2));
    let value = |_b: usize, t: usize, y: usize, x: usize| {
        if (t + y + x) % 4 == 1 {
            f64::NAN
        } else {
            ((t * 7 + y * 3 + x) % 11) as f64 - 3.0
        }
    };
    let input = Arc::new(FnCube::new(reference, &["v"], 1.0, value));
    let kinds = [
        AggregatorKind::Min,
        AggregatorKind::Max,
        AggregatorKind::Mean,
        AggregatorKind::Median,
        AggregatorKind::Var,
        AggregatorKind::Sd,
        AggregatorKind::Count,
        AggregatorKind::Sum,
        AggregatorKind::Prod,
        AggregatorKind::First,
        AggregatorKind::Last,
        AggregatorKind::WhichMin,
        AggregatorKind::WhichMax,
    ];
    let reducers = kinds.iter().map(|k| ReducerSpec::new(*k, "v")).collect();
    let reduced = ReduceTimeCube::new(input, reducers).unwrap();
    let out = full(&reduced);

    for y in 0..3 {
        for x in 0..3 {
            let series: Vec<f64> = (0..10).map(|t| value(0, t, y, x)).collect();
            for (o, kind) in kinds.iter().enumerate() {
                let expected = reduce_series(*kind, &series);
                let got = out.get(o, 0, y, x);
                assert_values_approx_eq!(&[got], &[expected], 1e-9);
            }
        }
    }
}

#[test]
fn test_reduce_space_per_slice() {
    let reference = daily_reference(4, 3, 2, ChunkShape::new(1, 2, 2));
    let input: CubeRef = Arc::new(FnCube::pattern(reference, &["a"]));
    let reduced = ReduceSpaceCube::new(
        Arc::clone(&input),
        vec![
            ReducerSpec::new(AggregatorKind::Max, "a"),
            ReducerSpec::new(AggregatorKind::Mean, "a"),
        ],
    )
    .unwrap();
    assert_eq!((reduced.reference().nx, reduced.reference().ny), (1, 1));

    let out = full(&reduced);
    for t in 0..2 {
        let values: Vec<f64> = (0..3)
            .flat_map(|y| (0..4).map(move |x| pattern_value(0, t, y, x)))
            .collect();
        assert_eq!(out.get(0, t, 0, 0), pattern_value(0, t, 2, 3));
        assert_approx_eq!(
            out.get(1, t, 0, 0),
            reduce_series(AggregatorKind::Mean, &values),
            1e-9
        );
    }

    let err = ReduceSpaceCube::new(input, vec![ReducerSpec::new(AggregatorKind::WhichMax, "a")])
        .err()
        .unwrap();
    assert!(matches!(err, CubeError::Config(_)));
}

#[test]
fn test_window_time_edge_policies() {
    let series = vec![1.0, 2.0, 3.0, 4.0, 5.0];
    let mean = WindowOp::Reduce {
        reducers: vec![ReducerSpec::new(AggregatorKind::Mean, "value")],
    };

    let shrink = WindowTimeCube::new(
        series_cube(series.clone(), 2),
        1,
        1,
        mean.clone(),
        EdgePolicy::Shrink,
    )
    .unwrap();
    assert_values_approx_eq!(full(&shrink).values(), &[1.5, 2.0, 3.0, 4.0, 4.5], 1e-12);

    let nodata = WindowTimeCube::new(
        series_cube(series.clone(), 2),
        1,
        1,
        mean,
        EdgePolicy::Nodata,
    )
    .unwrap();
    assert_values_approx_eq!(
        full(&nodata).values(),
        &[f64::NAN, 2.0, 3.0, 4.0, f64::NAN],
        1e-12
    );

    let kernel = WindowTimeCube::new(
        series_cube(series, 2),
        1,
        1,
        WindowOp::Kernel {
            weights: vec![0.25, 0.5, 0.25],
        },
        EdgePolicy::Shrink,
    )
    .unwrap();
    assert_values_approx_eq!(full(&kernel).values(), &[1.0, 2.0, 3.0, 4.0, 3.5], 1e-12);
}

#[test]
fn test_window_time_kernel_size_checked() {
    let err = WindowTimeCube::new(
        series_cube(vec![1.0, 2.0], 1),
        1,
        1,
        WindowOp::Kernel {
            weights: vec![1.0, 1.0],
        },
        EdgePolicy::Shrink,
    )
    .err()
    .unwrap();
    assert!(matches!(err, CubeError::Config(_)));
}

#[test]
fn test_join_bands_requires_equal_references() {
    let a: CubeRef = Arc::new(FnCube::pattern(
        daily_reference(4, 4, 2, ChunkShape::new(1, 2, 2)),
        &["value"],
    ));
    let b: CubeRef = Arc::new(FnCube::pattern(
        daily_reference(4, 4, 3, ChunkShape::new(1, 2, 2)),
        &["value"],
    ));
    let err = JoinBandsCube::new(vec![Arc::clone(&a), b], None).err().unwrap();
    assert!(matches!(err, CubeError::ReferenceMismatch(_)));
    assert!(!err.is_recoverable());

    // Same band name twice without prefixes is ambiguous.
    let err = JoinBandsCube::new(vec![Arc::clone(&a), Arc::clone(&a)], None)
        .err()
        .unwrap();
    assert!(matches!(err, CubeError::Config(_)));

    let joined = JoinBandsCube::new(
        vec![Arc::clone(&a), Arc::clone(&a)],
        Some(vec!["left".to_string(), "right".to_string()]),
    )
    .unwrap();
    assert_eq!(joined.bands().names(), vec!["left.value", "right.value"]);
    let chunk = joined.compute_chunk(ChunkIndex::new(1, 1, 1)).unwrap();
    assert_eq!(chunk.band(0), chunk.band(1));
}

#[test]
fn test_band_operators() {
    let input: CubeRef = Arc::new(FnCube::pattern(
        daily_reference(2, 2, 1, ChunkShape::new(1, 2, 2)),
        &["red", "nir"],
    ));
    let idx = ChunkIndex::new(0, 0, 0);

    let selected = SelectBandsCube::new(Arc::clone(&input), &["nir"]).unwrap();
    assert_eq!(selected.bands().names(), vec!["nir"]);
    assert_eq!(
        selected.compute_chunk(idx).unwrap().get(0, 0, 1, 1),
        pattern_value(1, 0, 1, 1)
    );

    let renamed = RenameBandsCube::new(
        Arc::clone(&input),
        vec![("red".to_string(), "B04".to_string())],
    )
    .unwrap();
    assert_eq!(renamed.bands().names(), vec!["B04", "nir"]);

    let ndvi = ApplyPixelCube::new(
        Arc::clone(&input),
        &["(nir - red) / (nir + red)".to_string()],
        &["ndvi".to_string()],
        true,
    )
    .unwrap();
    assert_eq!(ndvi.bands().names(), vec!["red", "nir", "ndvi"]);
    let chunk = ndvi.compute_chunk(idx).unwrap();
    let (red, nir) = (pattern_value(0, 0, 1, 0), pattern_value(1, 0, 1, 0));
    assert_approx_eq!(chunk.get(2, 0, 1, 0), (nir - red) / (nir + red), 1e-12);

    let bad = ApplyPixelCube::new(
        Arc::clone(&input),
        &["swir * 2".to_string()],
        &["x".to_string()],
        false,
    );
    assert!(matches!(bad.err().unwrap(), CubeError::Config(_)));

    // Only pixels with x == 1 survive.
    let filtered = FilterPixelCube::new(Arc::clone(&input), "red % 100 >= 1").unwrap();
    let chunk = filtered.compute_chunk(idx).unwrap();
    for b in 0..2 {
        for y in 0..2 {
            assert!(chunk.get(b, 0, y, 0).is_nan());
            assert_eq!(chunk.get(b, 0, y, 1), pattern_value(b, 0, y, 1));
        }
    }
}

#[test]
fn test_filter_geom_masks_outside_pixels() {
    // 4x4 pixels of 10 units; the triangle covers the lower-left half
    // without touching any pixel centre.
    let input: CubeRef = Arc::new(FnCube::pattern(
        daily_reference(4, 4, 1, ChunkShape::new(1, 2, 2)),
        &["a"],
    ));
    let geom = FilterGeomCube::new(
        Arc::clone(&input),
        vec![vec![[0.0, 0.0], [41.0, 0.0], [0.0, 41.0]]],
    )
    .unwrap();
    let out = full(&geom);
    for y in 0..4 {
        for x in 0..4 {
            let (cx, cy) = (x as f64 * 10.0 + 5.0, y as f64 * 10.0 + 5.0);
            if cx + cy < 41.0 {
                assert_eq!(out.get(0, 0, y, x), pattern_value(0, 0, y, x));
            } else {
                assert!(out.get(0, 0, y, x).is_nan(), "pixel ({}, {})", y, x);
            }
        }
    }

    // Top-right chunk is outside the bounding box of a small square.
    let small = FilterGeomCube::new(
        input,
        vec![vec![[0.0, 0.0], [10.0, 0.0], [10.0, 10.0], [0.0, 10.0]]],
    )
    .unwrap();
    assert!(small
        .compute_chunk(ChunkIndex::new(0, 1, 1))
        .unwrap()
        .all_nodata());
}

#[test]
fn test_crop_reads_across_chunk_borders() {
    let input: CubeRef = Arc::new(FnCube::pattern(
        daily_reference(6, 6, 4, ChunkShape::new(2, 4, 4)),
        &["a"],
    ));
    let crop = CropCube::new(
        input,
        Some(SpatialExtent::new(15.0, 45.0, 25.0, 55.0)),
        Some(datetime(2020, 1, 2)),
        Some(datetime(2020, 1, 3)),
    )
    .unwrap();
    let r = crop.reference();
    assert_eq!((r.nx, r.ny, r.nt), (4, 4, 2));
    assert_eq!(r.extent, SpatialExtent::new(10.0, 50.0, 20.0, 60.0));
    assert_eq!(r.start(), datetime(2020, 1, 2));

    let out = full(&crop);
    for t in 0..2 {
        for y in 0..4 {
            for x in 0..4 {
                assert_eq!(out.get(0, t, y, x), pattern_value(0, t + 1, y + 2, x + 1));
            }
        }
    }
}

#[test]
fn test_aggregate_time_to_coarser_step() {
    let input = series_cube(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], 2);
    let weekly = AggregateTimeCube::new(Arc::clone(&input), TimeStep::days(2), AggregatorKind::Sum)
        .unwrap();
    assert_eq!(weekly.reference().nt, 3);
    assert_values_approx_eq!(full(&weekly).values(), &[3.0, 7.0, 11.0], 1e-12);

    let three = AggregateTimeCube::new(Arc::clone(&input), TimeStep::days(3), AggregatorKind::Max)
        .unwrap();
    assert_values_approx_eq!(full(&three).values(), &[3.0, 6.0], 1e-12);

    let err = AggregateTimeCube::new(input, TimeStep::parse("PT36H").unwrap(), AggregatorKind::Mean)
        .err()
        .unwrap();
    assert!(matches!(err, CubeError::Config(_)));
}

#[test]
fn test_aggregate_time_folds_input_chunks_one_by_one() {
    let counting = Arc::new(CountingCube::new(series_cube(
        vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0],
        2,
    )));
    let input: CubeRef = counting.clone();
    let sums = AggregateTimeCube::new(input, TimeStep::days(3), AggregatorKind::Sum).unwrap();
    assert_eq!(sums.reference().chunk_counts(), (1, 1, 1));
    let out = sums.compute_chunk(ChunkIndex::new(0, 0, 0)).unwrap();
    assert_values_approx_eq!(out.values(), &[6.0, 15.0], 1e-12);
    assert_eq!(counting.calls(), 3);

    // A cropped input starts one slice into its parent's axis.
    let cropped: CubeRef = Arc::new(
        CropCube::new(
            series_cube(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], 2),
            None,
            Some(datetime(2020, 1, 2)),
            Some(datetime(2020, 1, 5)),
        )
        .unwrap(),
    );
    let pairs = AggregateTimeCube::new(cropped, TimeStep::days(2), AggregatorKind::Sum).unwrap();
    assert_eq!(pairs.reference().start(), datetime(2020, 1, 2));
    assert_values_approx_eq!(full(&pairs).values(), &[5.0, 9.0], 1e-12);
}

#[test]
fn test_aggregate_space_blocks() {
    let input: CubeRef = Arc::new(FnCube::pattern(
        daily_reference(5, 3, 2, ChunkShape::new(1, 2, 2)),
        &["a"],
    ));
    let max = AggregateSpaceCube::new(Arc::clone(&input), [2, 2], AggregatorKind::Max).unwrap();
    let r = max.reference();
    assert_eq!((r.nx, r.ny, r.nt), (3, 2, 2));
    assert_eq!(r.extent, SpatialExtent::new(0.0, 60.0, 0.0, 40.0));
    assert_eq!(r.chunk, ChunkShape::new(1, 2, 2));

    let out = full(&max);
    for t in 0..2 {
        for y in 0..2 {
            for x in 0..3 {
                let expected = pattern_value(0, t, (2 * y + 1).min(2), (2 * x + 1).min(4));
                assert_eq!(out.get(0, t, y, x), expected);
            }
        }
    }

    let mean = AggregateSpaceCube::new(Arc::clone(&input), [2, 2], AggregatorKind::Mean).unwrap();
    assert_approx_eq!(full(&mean).get(0, 0, 0, 0), 50.5, 1e-12);
    let count = AggregateSpaceCube::new(Arc::clone(&input), [2, 2], AggregatorKind::Count).unwrap();
    let counts = full(&count);
    assert_eq!(counts.get(0, 1, 0, 0), 4.0);
    assert_eq!(counts.get(0, 1, 1, 2), 1.0);

    for method in [AggregatorKind::First, AggregatorKind::WhichMax] {
        let err = AggregateSpaceCube::new(Arc::clone(&input), [2, 2], method).err().unwrap();
        assert!(matches!(err, CubeError::Config(_)));
    }
    let err = AggregateSpaceCube::new(input, [0, 2], AggregatorKind::Max).err().unwrap();
    assert!(matches!(err, CubeError::Config(_)));
}

#[test]
fn test_select_time_builds_labeled_axis() {
    let counting = Arc::new(CountingCube::new(series_cube(
        (1..=8).map(f64::from).collect(),
        3,
    )));
    let input: CubeRef = counting.clone();
    let noon = datetime(2020, 1, 2) + chrono::Duration::hours(12);
    let selected: CubeRef = Arc::new(
        SelectTimeCube::new(
            Arc::clone(&input),
            vec![
                datetime(2020, 1, 7),
                datetime(2020, 1, 2),
                datetime(2020, 1, 3),
                noon,
                datetime(2020, 1, 7),
            ],
        )
        .unwrap(),
    );
    let r = selected.reference();
    assert_eq!(r.nt, 3);
    assert!(r.is_labeled());
    assert_eq!(r.datetime_at(2), datetime(2020, 1, 7));
    assert_eq!(r.end(), datetime(2020, 1, 8));
    assert_eq!(r.slice_index_of(noon), Some(0));
    assert_eq!(r.slice_index_of(datetime(2020, 1, 5)), None);

    assert_values_approx_eq!(full(selected.as_ref()).values(), &[2.0, 3.0, 7.0], 1e-12);
    // Slices 1 and 2 share the first input chunk; slice 6 lives in the third.
    assert_eq!(counting.calls(), 2);

    let reduced = ReduceTimeCube::new(
        Arc::clone(&selected),
        vec![ReducerSpec::new(AggregatorKind::Mean, "value")],
    )
    .unwrap();
    assert_eq!(reduced.reference().start(), datetime(2020, 1, 2));
    assert_eq!(reduced.reference().end(), datetime(2020, 1, 8));
    assert_approx_eq!(full(&reduced).get(0, 0, 0, 0), 4.0, 1e-12);

    let cropped = CropCube::new(
        Arc::clone(&selected),
        None,
        Some(datetime(2020, 1, 3)),
        Some(datetime(2020, 1, 7)),
    )
    .unwrap();
    assert_values_approx_eq!(full(&cropped).values(), &[3.0, 7.0], 1e-12);

    let err = AggregateTimeCube::new(selected, TimeStep::days(2), AggregatorKind::Sum)
        .err()
        .unwrap();
    assert!(matches!(err, CubeError::Config(_)));
    let err = SelectTimeCube::new(input, vec![noon]).err().unwrap();
    assert!(matches!(err, CubeError::Config(_)));
}

#[test]
fn test_slice_time_by_index_or_datetime() {
    let input: CubeRef = Arc::new(FnCube::pattern(
        daily_reference(3, 3, 5, ChunkShape::new(2, 2, 2)),
        &["a"],
    ));
    let by_index = SliceTimeCube::new(Arc::clone(&input), Some(3), None).unwrap();
    let r = by_index.reference();
    assert_eq!(r.nt, 1);
    assert_eq!(r.start(), datetime(2020, 1, 4));
    assert_eq!(r.chunk, ChunkShape::new(1, 2, 2));
    let out = full(&by_index);
    for y in 0..3 {
        for x in 0..3 {
            assert_eq!(out.get(0, 0, y, x), pattern_value(0, 3, y, x));
        }
    }

    let inside = datetime(2020, 1, 4) + chrono::Duration::hours(6);
    let by_time = SliceTimeCube::new(Arc::clone(&input), None, Some(inside)).unwrap();
    assert_eq!(full(&by_time), out);

    let err = SliceTimeCube::new(Arc::clone(&input), Some(5), None).err().unwrap();
    assert!(matches!(err, CubeError::OutOfBounds { .. }));
    let err = SliceTimeCube::new(Arc::clone(&input), None, Some(datetime(2021, 1, 1)))
        .err()
        .unwrap();
    assert!(matches!(err, CubeError::OutOfBounds { .. }));
    let err = SliceTimeCube::new(input, None, None).err().unwrap();
    assert!(matches!(err, CubeError::Config(_)));
}

#[test]
fn test_slice_space_by_pixel_or_point() {
    let input: CubeRef = Arc::new(FnCube::pattern(
        daily_reference(4, 4, 3, ChunkShape::new(2, 2, 2)),
        &["a", "b"],
    ));
    let by_pixel = SliceSpaceCube::new(Arc::clone(&input), Some([3, 1]), None).unwrap();
    let r = by_pixel.reference();
    assert_eq!((r.nx, r.ny, r.nt), (1, 1, 3));
    assert_eq!(r.extent, SpatialExtent::new(30.0, 40.0, 10.0, 20.0));
    let out = full(&by_pixel);
    for b in 0..2 {
        for t in 0..3 {
            assert_eq!(out.get(b, t, 0, 0), pattern_value(b, t, 1, 3));
        }
    }

    let by_point = SliceSpaceCube::new(Arc::clone(&input), None, Some([35.0, 15.0])).unwrap();
    assert_eq!(full(&by_point), out);

    let err = SliceSpaceCube::new(Arc::clone(&input), Some([4, 0]), None).err().unwrap();
    assert!(matches!(err, CubeError::OutOfBounds { .. }));
    let err = SliceSpaceCube::new(Arc::clone(&input), None, Some([45.0, 5.0])).err().unwrap();
    assert!(matches!(err, CubeError::OutOfBounds { .. }));
    let err = SliceSpaceCube::new(input, Some([0, 0]), Some([5.0, 5.0])).err().unwrap();
    assert!(matches!(err, CubeError::Config(_)));
}

#[test]
fn test_point_and_series_queries() {
    let counting = Arc::new(CountingCube::new(Arc::new(FnCube::pattern(
        daily_reference(4, 4, 4, ChunkShape::new(2, 2, 2)),
        &["a", "b"],
    ))));
    let cube: &dyn Cube = counting.as_ref();

    let point = |x: f64, y: f64, day: u32| SpaceTimePoint {
        x,
        y,
        t: datetime(2020, 1, day),
    };
    let rows = query_points(
        cube,
        &[
            point(5.0, 5.0, 1),
            point(15.0, 5.0, 2),
            point(35.0, 25.0, 4),
            point(50.0, 5.0, 1),
            point(5.0, 5.0, 9),
        ],
    )
    .unwrap();
    assert_eq!(rows[0], vec![pattern_value(0, 0, 0, 0), pattern_value(1, 0, 0, 0)]);
    assert_eq!(rows[1], vec![pattern_value(0, 1, 0, 1), pattern_value(1, 1, 0, 1)]);
    assert_eq!(rows[2], vec![pattern_value(0, 3, 2, 3), pattern_value(1, 3, 2, 3)]);
    assert!(rows[3].iter().chain(&rows[4]).all(|v| v.is_nan()));
    // The first two points share a chunk.
    assert_eq!(counting.calls(), 2);

    let series = query_timeseries(cube, &[[25.0, 35.0], [-1.0, 0.0]]).unwrap();
    assert_eq!(series.len(), 2);
    let expected: Vec<f64> = (0..4).map(|t| pattern_value(1, t, 3, 2)).collect();
    assert_eq!(series[0].values[1], expected);
    assert!(series[1].values.iter().flatten().all(|v| v.is_nan()));
}

#[test]
fn test_zonal_statistics() {
    let input = FnCube::pattern(daily_reference(4, 4, 2, ChunkShape::new(1, 2, 2)), &["a"]);
    // Lower-left 2x2 pixels, and a thin zone over the centre of pixel (3, 3).
    let lower_left = Polygon::new(vec![vec![[0.0, 0.0], [20.0, 0.0], [20.0, 20.0], [0.0, 20.0]]])
        .unwrap();
    let corner = Polygon::new(vec![vec![[34.0, 34.0], [36.0, 34.0], [36.0, 36.0], [34.0, 36.0]]])
        .unwrap();
    let outside = Polygon::new(vec![vec![[100.0, 100.0], [110.0, 100.0], [105.0, 110.0]]])
        .unwrap();
    let stats = zonal_statistics(
        &input,
        &[lower_left, corner, outside],
        &[
            ReducerSpec::new(AggregatorKind::Mean, "a"),
            ReducerSpec::new(AggregatorKind::Count, "a"),
        ],
    )
    .unwrap();
    assert_eq!(stats[0].names, vec!["a_mean", "a_count"]);
    for t in 0..2 {
        let values = [(0, 0), (0, 1), (1, 0), (1, 1)].map(|(y, x)| pattern_value(0, t, y, x));
        assert_approx_eq!(stats[0].values[0][t], values.iter().sum::<f64>() / 4.0, 1e-9);
        assert_eq!(stats[0].values[1][t], 4.0);
        assert_eq!(stats[1].values[0][t], pattern_value(0, t, 3, 3));
        assert_eq!(stats[1].values[1][t], 1.0);
        assert_eq!(stats[2].values[1][t], 0.0);
        assert!(stats[2].values[0][t].is_nan());
    }

    let err = zonal_statistics(&input, &[], &[ReducerSpec::new(AggregatorKind::WhichMin, "a")])
        .err()
        .unwrap();
    assert!(matches!(err, CubeError::Config(_)));
}

#[test]
fn test_fill_time_methods() {
    let series = vec![f64::NAN, 1.0, f64::NAN, f64::NAN, 4.0, f64::NAN];
    let cases = [
        (FillMethod::Linear, vec![f64::NAN, 1.0, 2.0, 3.0, 4.0, f64::NAN]),
        (FillMethod::Locf, vec![f64::NAN, 1.0, 1.0, 1.0, 4.0, 4.0]),
        (FillMethod::Nocb, vec![1.0, 1.0, 4.0, 4.0, 4.0, f64::NAN]),
    ];
    for (method, expected) in cases {
        let filled = FillTimeCube::new(series_cube(series.clone(), 4), method);
        assert_values_approx_eq!(full(&filled).values(), &expected, 1e-12);
    }
}

#[test]
fn test_source_merges_images_and_survives_read_failures() {
    let full_extent = SpatialExtent::new(0.0, 40.0, 0.0, 40.0);
    let catalog = SyntheticCatalog::new(&["red", "nir"])
        .with_image("a.tif", datetime(2020, 1, 1), full_extent)
        .with_image("b.tif", datetime(2020, 1, 1), full_extent)
        .with_image("broken.tif", datetime(2020, 1, 2), full_extent);
    let reader = SyntheticReader::new()
        .with_value("a.tif", 10.0)
        .with_value("b.tif", 20.0)
        .with_failure("broken.tif");
    let catalog = Arc::new(catalog);
    let reader = Arc::new(reader);
    let reference = daily_reference(4, 4, 2, ChunkShape::new(2, 4, 4));

    let mean = SourceCube::new(
        "synthetic",
        reference.clone(),
        None,
        catalog.clone(),
        reader.clone(),
        ResamplingMethod::Bilinear,
        SliceAggregation::Mean,
    )
    .unwrap();
    let chunk = mean.compute_chunk(ChunkIndex::new(0, 0, 0)).unwrap();
    assert!(chunk.plane(0, 0).iter().all(|&v| v == 15.0));
    assert!(chunk.plane(1, 0).iter().all(|&v| v == 1015.0));
    assert!(chunk.plane(0, 1).iter().all(|v| v.is_nan()));
    assert_eq!(mean.warnings(), 2);

    let first = SourceCube::new(
        "synthetic",
        reference.clone(),
        Some(vec!["nir".to_string()]),
        catalog.clone(),
        reader.clone(),
        ResamplingMethod::Nearest,
        SliceAggregation::First,
    )
    .unwrap();
    assert_eq!(first.bands().names(), vec!["nir"]);
    let chunk = first.compute_chunk(ChunkIndex::new(0, 0, 0)).unwrap();
    assert!(chunk.plane(0, 0).iter().all(|&v| v == 1010.0));

    let unknown = SourceCube::new(
        "synthetic",
        reference,
        Some(vec!["swir".to_string()]),
        catalog,
        reader,
        ResamplingMethod::Nearest,
        SliceAggregation::First,
    );
    assert!(matches!(unknown.err().unwrap(), CubeError::Config(_)));
}

#[cfg(unix)]
mod stream {
    use super::*;
    use cube_engine::cube::StreamCube;

    fn input() -> CubeRef {
        Arc::new(FnCube::pattern(
            daily_reference(3, 2, 2, ChunkShape::new(2, 2, 2)),
            &["a", "b"],
        ))
    }

    #[test]
    fn test_identity_process() {
        let cube = StreamCube::new(input(), "cat", Vec::new()).unwrap();
        let idx = ChunkIndex::new(0, 0, 1);
        let expected = input().compute_chunk(idx).unwrap();
        assert_eq!(cube.compute_chunk(idx).unwrap(), expected);
    }

    #[test]
    fn test_nonzero_exit_is_stream_failure() {
        let cube = StreamCube::new(
            input(),
            "sh",
            vec!["-c".to_string(), "cat > /dev/null; exit 3".to_string()],
        )
        .unwrap();
        let err = cube.compute_chunk(ChunkIndex::new(0, 0, 0)).unwrap_err();
        assert!(matches!(err, CubeError::StreamFailure(_)));
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_truncated_output_is_stream_failure() {
        let cube = StreamCube::new(
            input(),
            "sh",
            vec!["-c".to_string(), "head -c 20".to_string()],
        )
        .unwrap();
        let err = cube.compute_chunk(ChunkIndex::new(0, 0, 0)).unwrap_err();
        assert!(matches!(err, CubeError::StreamFailure(_)));
    }

    #[test]
    fn test_oversized_header_is_stream_failure() {
        // Four i32::MAX dimensions and no values.
        let script = "cat > /dev/null; for i in 1 2 3 4; do printf '\\377\\377\\377\\177'; done";
        let cube = StreamCube::new(input(), "sh", vec!["-c".to_string(), script.to_string()])
            .unwrap();
        let err = cube.compute_chunk(ChunkIndex::new(0, 0, 0)).unwrap_err();
        assert!(matches!(err, CubeError::StreamFailure(_)));
    }

    #[test]
    fn test_streaming_environment() {
        // Echoes the chunk only when both variables are set as expected.
        let script = "[ \"$CUBE_STREAMING\" = 1 ] && [ \"$CUBE_STREAMING_CHUNK_ID\" = 1 ] && exec cat";
        let cube = StreamCube::new(input(), "sh", vec!["-c".to_string(), script.to_string()])
            .unwrap();
        assert!(cube.compute_chunk(ChunkIndex::new(0, 0, 1)).is_ok());
        assert!(cube.compute_chunk(ChunkIndex::new(0, 0, 0)).is_err());
    }
}
