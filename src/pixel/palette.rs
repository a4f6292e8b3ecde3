//! Palette generation and nearest-color lookup.
//!
//! [`build_palette`] keeps every color when the image has few enough of
//! them, otherwise it runs a median cut: the box with the widest channel
//! range is split at its median until the entry budget is used up, and
//! each box contributes its average color.

use std::collections::{HashMap, HashSet};

use crate::pixel::color::Rgba8;

/// Build a palette of at most `max_entries` colors covering `colors`.
pub fn build_palette<I>(colors: I, max_entries: usize) -> Vec<Rgba8>
where
    I: IntoIterator<Item = Rgba8>,
{
    let unique: HashSet<Rgba8> = colors.into_iter().collect();
    let mut unique: Vec<Rgba8> = unique.into_iter().collect();
    unique.sort_by_key(|c| (c.a, c.r, c.g, c.b));

    if unique.len() <= max_entries || max_entries == 0 {
        unique.truncate(max_entries);
        return unique;
    }
    median_cut(unique, max_entries)
}

fn channel(c: &Rgba8, index: usize) -> u8 {
    match index {
        0 => c.r,
        1 => c.g,
        2 => c.b,
        _ => c.a,
    }
}

/// Widest channel of a box and its range.
fn widest_channel(colors: &[Rgba8]) -> (usize, u8) {
    (0..4)
        .map(|ch| {
            let lo = colors.iter().map(|c| channel(c, ch)).min().unwrap_or(0);
            let hi = colors.iter().map(|c| channel(c, ch)).max().unwrap_or(0);
            (ch, hi - lo)
        })
        .max_by_key(|&(_, range)| range)
        .unwrap_or((0, 0))
}

fn median_cut(colors: Vec<Rgba8>, max_entries: usize) -> Vec<Rgba8> {
    let mut boxes: Vec<Vec<Rgba8>> = vec![colors];
    while boxes.len() < max_entries {
        let candidate = boxes
            .iter()
            .enumerate()
            .filter(|(_, b)| b.len() > 1)
            .map(|(i, b)| (i, widest_channel(b)))
            .max_by_key(|&(_, (_, range))| range);
        let (index, (ch, range)) = match candidate {
            Some(c) => c,
            None    => break,
        };
        if range == 0 {
            break;
        }
        let mut current = boxes.swap_remove(index);
        current.sort_by_key(|c| channel(c, ch));
        let upper = current.split_off(current.len() / 2);
        boxes.push(current);
        boxes.push(upper);
    }

    boxes.iter().map(|b| average(b)).collect()
}

fn average(colors: &[Rgba8]) -> Rgba8 {
    let n = colors.len().max(1) as u32;
    let sum = colors.iter().fold([0u32; 4], |mut acc, c| {
        acc[0] += c.r as u32;
        acc[1] += c.g as u32;
        acc[2] += c.b as u32;
        acc[3] += c.a as u32;
        acc
    });
    Rgba8::new(
        ((sum[0] + n / 2) / n) as u8,
        ((sum[1] + n / 2) / n) as u8,
        ((sum[2] + n / 2) / n) as u8,
        ((sum[3] + n / 2) / n) as u8,
    )
}

/// Nearest-color lookup into a fixed palette, memoised per color.
pub struct PaletteIndexer<'p> {
    palette: &'p [Rgba8],
    cache:   HashMap<Rgba8, u32>,
}

impl<'p> PaletteIndexer<'p> {
    pub fn new(palette: &'p [Rgba8]) -> Self {
        Self { palette, cache: HashMap::new() }
    }

    pub fn index_of(&mut self, color: Rgba8) -> u32 {
        if let Some(&i) = self.cache.get(&color) {
            return i;
        }
        let index = self.palette
            .iter()
            .enumerate()
            .min_by_key(|(_, entry)| entry.distance_sq(&color))
            .map(|(i, _)| i as u32)
            .unwrap_or(0);
        self.cache.insert(color, index);
        index
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn few_colors_are_kept_exactly() {
        let colors = [Rgba8::opaque(1, 2, 3), Rgba8::opaque(4, 5, 6), Rgba8::opaque(1, 2, 3)];
        let palette = build_palette(colors, 16);
        assert_eq!(palette.len(), 2);
        assert!(palette.contains(&Rgba8::opaque(4, 5, 6)));
    }

    #[test]
    fn median_cut_respects_budget() {
        let colors = (0..=255u8).map(|v| Rgba8::opaque(v, 255 - v, v / 2));
        let palette = build_palette(colors, 16);
        assert_eq!(palette.len(), 16);

        let mut indexer = PaletteIndexer::new(&palette);
        let i = indexer.index_of(Rgba8::opaque(0, 255, 0));
        let entry = palette[i as usize];
        assert!(entry.r < 32 && entry.g > 223, "{entry:?}");
    }

    #[test]
    fn indexer_prefers_exact_match() {
        let palette = [Rgba8::opaque(0, 0, 0), Rgba8::opaque(255, 255, 255), Rgba8::new(255, 255, 255, 0)];
        let mut indexer = PaletteIndexer::new(&palette);
        assert_eq!(indexer.index_of(Rgba8::new(250, 250, 250, 10)), 2);
        assert_eq!(indexer.index_of(Rgba8::opaque(200, 200, 200)), 1);
    }
}
