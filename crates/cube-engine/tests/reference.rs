//! Chunk addressing checked end to end against synthetic cubes.

use cube_engine::{read_window, ChunkIndex, ChunkShape, Cube, PixelWindow, SpaceTimePoint};
use test_utils::{daily_reference, four_chunk_reference, pattern_value, FnCube};

#[test]
fn test_every_chunk_contains_its_own_pixels() {
    // 7x5 pixels with 3x2 chunks leaves partial chunks on both spatial edges.
    let r = daily_reference(7, 5, 4, ChunkShape::new(3, 2, 3));
    assert_eq!(r.chunk_counts(), (2, 3, 3));

    for idx in r.all_chunks() {
        let b = r.bounds_of(idx).unwrap();
        assert!(!b.window.is_empty(), "chunk {} is empty", idx);

        for (x, y) in [(b.window.x0, b.window.y0), (b.window.x1 - 1, b.window.y1 - 1)] {
            let p = SpaceTimePoint {
                x: r.extent.left + (x as f64 + 0.5) * r.dx(),
                y: r.extent.bottom + (y as f64 + 0.5) * r.dy(),
                t: r.datetime_at(b.window.t1 - 1),
            };
            assert_eq!(r.chunk_index_of(p).unwrap(), idx);
        }
        assert_eq!(r.from_linear(r.to_linear(idx)).unwrap(), idx);
    }
}

#[test]
fn test_chunk_windows_tile_the_cube() {
    let r = daily_reference(7, 5, 4, ChunkShape::new(3, 2, 3));
    let mut covered = vec![0u8; r.nt * r.ny * r.nx];
    for idx in r.all_chunks() {
        let w = r.chunk_window(idx).unwrap();
        for t in w.t0..w.t1 {
            for y in w.y0..w.y1 {
                for x in w.x0..w.x1 {
                    covered[(t * r.ny + y) * r.nx + x] += 1;
                }
            }
        }
    }
    assert!(covered.iter().all(|&c| c == 1));
}

#[test]
fn test_four_chunk_bounds() {
    let r = four_chunk_reference();
    assert_eq!(r.chunk_count(), 4);

    let origin = r.bounds_of(ChunkIndex::new(0, 0, 0)).unwrap();
    assert_eq!((origin.window.x0, origin.window.x1), (0, 50));
    assert_eq!((origin.window.y0, origin.window.y1), (0, 50));

    // Rows count from the bottom, so chunk y=1 is the northern half.
    let north_east = r.bounds_of(ChunkIndex::new(0, 1, 1)).unwrap();
    assert_eq!(north_east.extent.left, 500.0);
    assert_eq!(north_east.extent.bottom, 500.0);
    assert_eq!(north_east.extent.top, 1000.0);
    assert_eq!(north_east.start, r.t0);
    assert_eq!(north_east.end, r.end());
}

#[test]
fn test_read_window_spans_chunk_boundaries() {
    let r = daily_reference(7, 5, 4, ChunkShape::new(3, 2, 3));
    let cube = FnCube::pattern(r, &["a", "b"]);
    let window = PixelWindow {
        t0: 2,
        t1: 4,
        y0: 1,
        y1: 4,
        x0: 2,
        x1: 6,
    };
    let data = read_window(&cube, &window).unwrap();
    assert_eq!(data.shape(), [2, 2, 3, 4]);
    for b in 0..2 {
        for t in 0..2 {
            for y in 0..3 {
                for x in 0..4 {
                    assert_eq!(
                        data.get(b, t, y, x),
                        pattern_value(b, t + 2, y + 1, x + 2)
                    );
                }
            }
        }
    }
    assert_eq!(cube.total_chunks(), 18);
}
