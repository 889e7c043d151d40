//! Margin dilation of baked atlases

use lowpoly_core::BakeImage;
use rayon::prelude::*;

const EDGE_NEIGHBORS: [(i64, i64); 4] = [(-1, 0), (1, 0), (0, -1), (0, 1)];
const CORNER_NEIGHBORS: [(i64, i64); 4] = [(-1, -1), (1, -1), (-1, 1), (1, 1)];

/// Grow the covered region of `image` by `passes` texels.
///
/// Each pass gives every uncovered texel the average of its covered edge
/// neighbours, or of its covered corner neighbours when no edge neighbour is
/// covered. Texels filled in a pass only become sources in the next one.
/// `covered` is updated in place.
pub fn dilate(image: &mut BakeImage, covered: &mut [bool], passes: u32) {
    let size = image.size() as usize;
    if size == 0 || covered.len() != size * size {
        return;
    }

    for _ in 0..passes {
        let source = image.pixels().to_vec();
        let mask = covered.to_vec();

        let filled: Vec<(usize, [f32; 4])> = (0..size * size)
            .into_par_iter()
            .filter(|&i| !mask[i])
            .filter_map(|i| {
                let (x, y) = ((i % size) as i64, (i / size) as i64);
                average_of(&source, &mask, size, x, y, &EDGE_NEIGHBORS)
                    .or_else(|| average_of(&source, &mask, size, x, y, &CORNER_NEIGHBORS))
                    .map(|value| (i, value))
            })
            .collect();

        if filled.is_empty() {
            break;
        }
        let pixels = image.pixels_mut();
        for (i, value) in filled {
            pixels[i] = value;
            covered[i] = true;
        }
    }
}

fn average_of(
    source: &[[f32; 4]],
    mask: &[bool],
    size: usize,
    x: i64,
    y: i64,
    offsets: &[(i64, i64)],
) -> Option<[f32; 4]> {
    let mut sum = [0.0f32; 4];
    let mut count = 0;
    for (dx, dy) in offsets {
        let (nx, ny) = (x + dx, y + dy);
        if nx < 0 || ny < 0 || nx >= size as i64 || ny >= size as i64 {
            continue;
        }
        let j = ny as usize * size + nx as usize;
        if mask[j] {
            for c in 0..4 {
                sum[c] += source[j][c];
            }
            count += 1;
        }
    }
    (count > 0).then(|| sum.map(|s| s / count as f32))
}

#[cfg(test)]
mod tests {
    use super::*;

    const FILL: [f32; 4] = [0.0, 0.0, 0.0, 1.0];
    const RED: [f32; 4] = [1.0, 0.0, 0.0, 1.0];

    fn single_texel(size: u32, x: u32, y: u32) -> (BakeImage, Vec<bool>) {
        let mut image = BakeImage::filled(size, FILL);
        image.set(x, y, RED);
        let mut covered = vec![false; (size * size) as usize];
        covered[(y * size + x) as usize] = true;
        (image, covered)
    }

    #[test]
    fn test_one_pass_fills_edges_only() {
        let (mut image, mut covered) = single_texel(5, 2, 2);
        dilate(&mut image, &mut covered, 1);
        assert_eq!(image.get(1, 2), RED);
        assert_eq!(image.get(2, 3), RED);
        // Corners also have a covered neighbour, but only diagonally
        assert_eq!(image.get(1, 1), RED);
        assert_eq!(image.get(0, 2), FILL);
        assert_eq!(covered.iter().filter(|c| **c).count(), 9);
    }

    #[test]
    fn test_passes_bound_the_margin() {
        let (mut image, mut covered) = single_texel(9, 4, 4);
        dilate(&mut image, &mut covered, 2);
        assert_eq!(image.get(2, 4), RED);
        assert_eq!(image.get(1, 4), FILL);
        assert_eq!(image.get(2, 2), RED);
    }

    #[test]
    fn test_zero_passes_is_identity() {
        let (mut image, mut covered) = single_texel(4, 0, 0);
        let before = image.clone();
        dilate(&mut image, &mut covered, 0);
        assert_eq!(image, before);
    }

    #[test]
    fn test_edge_neighbours_are_averaged() {
        let mut image = BakeImage::filled(3, FILL);
        let mut covered = vec![false; 9];
        image.set(0, 1, [1.0, 0.0, 0.0, 1.0]);
        image.set(2, 1, [0.0, 1.0, 0.0, 1.0]);
        covered[3] = true;
        covered[5] = true;
        dilate(&mut image, &mut covered, 1);
        assert_eq!(image.get(1, 1), [0.5, 0.5, 0.0, 1.0]);
    }
}
