//! Waterfall (masonry) placement for fixed-width cards with variable heights.
//!
//! Positions are computed purely from the measured boxes, so repeated calls
//! on unchanged input produce identical results. The first visual row is
//! filled left to right; every later card drops below the row-end with the
//! lowest bottom edge, which keeps the pseudo-columns balanced.

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Margins {
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
    pub left: f64,
}

impl Margins {
    pub fn uniform(value: f64) -> Self {
        Self {
            top: value,
            right: value,
            bottom: value,
            left: value,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CardBox {
    pub width: f64,
    pub height: f64,
    pub margins: Margins,
    pub top: f64,
    pub left: f64,
}

impl CardBox {
    pub fn new(width: f64, height: f64, margins: Margins) -> Self {
        Self {
            width,
            height,
            margins,
            top: 0.0,
            left: 0.0,
        }
    }

    /// Bottom edge including the bottom margin, as used for column picking.
    fn bottom_edge(&self) -> f64 {
        self.top + self.height + self.margins.bottom
    }

    /// Right edge including the right margin.
    fn right_edge(&self) -> f64 {
        self.left + self.width + self.margins.right
    }
}

/// Assigns `top`/`left` to every box and returns the container height.
///
/// An empty slice yields a zero-height container and touches nothing.
pub fn layout(container_width: f64, boxes: &mut [CardBox]) -> f64 {
    if boxes.is_empty() {
        return 0.0;
    }

    boxes[0].top = 0.0;
    boxes[0].left = boxes[0].margins.left;

    // First row: append to the right of the previous card while it fits.
    let mut row_ends: Vec<usize> = vec![0];
    let mut next = 1;
    while next < boxes.len() {
        let prev_right = boxes[next - 1].right_edge();
        if prev_right + boxes[next].width > container_width {
            break;
        }
        boxes[next].top = boxes[next - 1].top;
        boxes[next].left = prev_right + boxes[next].margins.left;
        row_ends.push(next);
        next += 1;
    }

    // Remaining cards drop below the current shortest column. The working
    // set is ordered by descending bottom edge (ties by descending left),
    // so the last entry is the one to fill.
    for idx in next..boxes.len() {
        sort_row_ends(boxes, &mut row_ends);
        let target = row_ends.pop().unwrap_or(0);
        boxes[idx].top = boxes[target].bottom_edge() + boxes[idx].margins.top;
        boxes[idx].left = boxes[target].left;
        row_ends.push(idx);
    }

    sort_row_ends(boxes, &mut row_ends);
    let tallest = &boxes[row_ends[0]];
    tallest.bottom_edge() + tallest.margins.bottom
}

fn sort_row_ends(boxes: &[CardBox], row_ends: &mut [usize]) {
    row_ends.sort_by(|&a, &b| {
        let (a, b) = (&boxes[a], &boxes[b]);
        b.bottom_edge()
            .partial_cmp(&a.bottom_edge())
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                b.left
                    .partial_cmp(&a.left)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn boxes(heights: &[f64], width: f64) -> Vec<CardBox> {
        heights
            .iter()
            .map(|&h| CardBox::new(width, h, Margins::default()))
            .collect()
    }

    #[test]
    fn empty_container_has_zero_height() {
        let mut empty: Vec<CardBox> = Vec::new();
        assert_eq!(layout(400.0, &mut empty), 0.0);
    }

    #[test]
    fn single_card_sits_at_origin() {
        let mut cards = boxes(&[120.0], 300.0);
        let height = layout(400.0, &mut cards);
        assert_eq!((cards[0].top, cards[0].left), (0.0, 0.0));
        assert_eq!(height, 120.0);
    }

    #[test]
    fn fills_shortest_column_first() {
        // Two columns of width 50 in a 100-wide container.
        let mut cards = boxes(&[30.0, 50.0, 20.0, 40.0], 50.0);
        let height = layout(100.0, &mut cards);

        assert_eq!((cards[0].top, cards[0].left), (0.0, 0.0));
        assert_eq!((cards[1].top, cards[1].left), (0.0, 50.0));
        // The third card goes under the shorter left column.
        assert_eq!((cards[2].top, cards[2].left), (30.0, 0.0));
        // Columns now tie at 50; the leftmost wins the tie.
        assert_eq!((cards[3].top, cards[3].left), (50.0, 0.0));
        assert_eq!(height, 90.0);
    }

    #[test]
    fn repeated_layout_is_idempotent() {
        let mut cards = boxes(&[80.0, 35.0, 61.0, 47.0, 52.0], 180.0);
        let first_height = layout(400.0, &mut cards);
        let snapshot = cards.clone();
        let second_height = layout(400.0, &mut cards);
        assert_eq!(first_height, second_height);
        assert_eq!(snapshot, cards);
    }

    #[test]
    fn margins_offset_positions_and_height() {
        let margins = Margins::uniform(10.0);
        let mut cards = vec![
            CardBox::new(100.0, 40.0, margins),
            CardBox::new(100.0, 60.0, margins),
        ];
        // Too narrow for a second column: the second card stacks below.
        let height = layout(150.0, &mut cards);
        assert_eq!((cards[0].top, cards[0].left), (0.0, 10.0));
        // Below the first card's bottom edge (40 + 10) plus its own top margin.
        assert_eq!((cards[1].top, cards[1].left), (60.0, 10.0));
        // Height counts the tallest bottom edge plus its bottom margin.
        assert_eq!(height, 60.0 + 60.0 + 10.0 + 10.0);
    }

    #[test]
    fn overflow_card_wider_than_container_still_places() {
        let mut cards = boxes(&[25.0, 25.0], 500.0);
        let height = layout(400.0, &mut cards);
        assert_eq!((cards[0].top, cards[0].left), (0.0, 0.0));
        assert_eq!((cards[1].top, cards[1].left), (25.0, 0.0));
        assert_eq!(height, 50.0);
    }
}
