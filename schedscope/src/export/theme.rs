//! Chart color theme
//!
//! Tableau palette, so charts match the plots the measurements are usually
//! compared against

use ratatui::style::Color;

use crate::topology::Category;

pub const PERFORMANCE_BLUE: Color = Color::Rgb(31, 119, 180);
pub const SMT_GREEN: Color = Color::Rgb(44, 160, 44);
pub const EFFICIENCY_ORANGE: Color = Color::Rgb(255, 127, 14);
pub const AXIS_DIM: Color = Color::Rgb(127, 127, 127);

/// Bar color for a CPU of `category`
///
/// - Efficiency core: orange
/// - Performance core, second hardware thread: green
/// - Performance core: blue
#[must_use]
pub const fn bar_color(category: Category, in_smt_set: bool) -> Color {
    match (category, in_smt_set) {
        (Category::Efficiency, _) => EFFICIENCY_ORANGE,
        (Category::SmtSibling, _) | (Category::Performance, true) => SMT_GREEN,
        (Category::Performance, false) => PERFORMANCE_BLUE,
    }
}

/// Legend name for a bar color
#[must_use]
pub fn color_name(color: Color) -> &'static str {
    match color {
        PERFORMANCE_BLUE => "blue",
        SMT_GREEN => "green",
        EFFICIENCY_ORANGE => "orange",
        _ => "default",
    }
}
