//! Per-CPU bar charts
//!
//! x = CPU id, y = migration count, bar color from [`bar_color`]. Charts are
//! drawn with ratatui into an off-screen [`Buffer`], then written out as
//! plain text or printed to the terminal in color.

#![allow(clippy::cast_possible_truncation)]

use crossterm::{
    queue,
    style::{self, Print, ResetColor, SetForegroundColor},
};
use ratatui::{
    buffer::Buffer,
    layout::Rect,
    style::{Color, Style},
    text::Line,
    widgets::{Bar, BarChart, BarGroup, Block, Widget},
};
use std::io::{self, Write};

use super::theme::{bar_color, color_name, AXIS_DIM, EFFICIENCY_ORANGE, PERFORMANCE_BLUE, SMT_GREEN};
use crate::aggregate::{Dimension, DimensionTable, GroupKey};
use crate::domain::{ClassificationError, CpuId};
use crate::topology::CpuTopology;

const CHART_HEIGHT: u16 = 16;
const MIN_BAR_WIDTH: u16 = 3;
const MIN_CHART_WIDTH: u16 = 48;

/// One CPU bar
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChartBar {
    pub cpu: CpuId,
    pub count: u64,
    pub color: Color,
}

/// Categorized bar chart for one per-CPU grouping dimension
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chart {
    pub dimension: Dimension,
    pub bars: Vec<ChartBar>,
}

impl Chart {
    /// Color every CPU bucket of `table` by its topology category
    ///
    /// Unattributed events have no CPU and are left out of the chart.
    ///
    /// # Errors
    /// Returns [`ClassificationError::NoTopology`] without a topology and
    /// [`ClassificationError::UnknownCpu`] for the first bucket whose CPU the
    /// topology cannot classify
    pub fn build(
        dimension: Dimension,
        table: &DimensionTable,
        topology: Option<&CpuTopology>,
    ) -> Result<Self, ClassificationError> {
        let topology = topology.ok_or(ClassificationError::NoTopology)?;

        let bars = table
            .buckets
            .iter()
            .filter_map(|(key, count)| match key {
                GroupKey::Cpu(cpu) => Some((*cpu, *count)),
                GroupKey::CpuPid(..) => None,
            })
            .map(|(cpu, count)| {
                let category = topology.category(cpu)?;
                Ok(ChartBar { cpu, count, color: bar_color(category, topology.is_smt_sibling(cpu)) })
            })
            .collect::<Result<Vec<_>, ClassificationError>>()?;

        Ok(Self { dimension, bars })
    }

    fn bar_width(&self) -> u16 {
        let widest = self.bars.iter().map(|bar| bar.count.to_string().len()).max().unwrap_or(0);
        (widest as u16).max(MIN_BAR_WIDTH)
    }

    /// Draw the chart into a fresh buffer sized to fit every bar
    #[must_use]
    pub fn render(&self) -> Buffer {
        let bar_width = self.bar_width();
        let bars_width = (self.bars.len() as u16).saturating_mul(bar_width + 1);
        let area = Rect::new(0, 0, (bars_width + 2).max(MIN_CHART_WIDTH), CHART_HEIGHT);
        let mut buffer = Buffer::empty(area);

        let bars: Vec<Bar> = self
            .bars
            .iter()
            .map(|bar| {
                Bar::default()
                    .value(bar.count)
                    .label(Line::from(bar.cpu.0.to_string()))
                    .style(Style::default().fg(bar.color))
                    .value_style(Style::default().fg(Color::Black).bg(bar.color))
            })
            .collect();

        BarChart::default()
            .block(
                Block::bordered()
                    .title(format!(" Migrations per CPU ({}) ", self.dimension.label()))
                    .border_style(Style::default().fg(AXIS_DIM)),
            )
            .bar_width(bar_width)
            .bar_gap(1)
            .data(BarGroup::default().bars(&bars))
            .render(area, &mut buffer);

        buffer
    }

    fn legend(&self) -> Vec<(Color, String)> {
        [
            (PERFORMANCE_BLUE, "performance core"),
            (SMT_GREEN, "performance core, SMT sibling"),
            (EFFICIENCY_ORANGE, "efficiency core"),
        ]
        .into_iter()
        .filter(|(color, _)| self.bars.iter().any(|bar| bar.color == *color))
        .map(|(color, text)| (color, format!("  {} = {text}", color_name(color))))
        .collect()
    }

    /// Plain-text rendering: chart rows, then the legend
    #[must_use]
    pub fn to_text(&self) -> String {
        let buffer = self.render();
        let area = buffer.area;
        let mut text = String::new();
        for y in area.top()..area.bottom() {
            let row: String = (area.left()..area.right())
                .filter_map(|x| buffer.cell((x, y)).map(ratatui::buffer::Cell::symbol))
                .collect();
            text.push_str(row.trim_end());
            text.push('\n');
        }
        for (_, line) in self.legend() {
            text.push_str(&line);
            text.push('\n');
        }
        text
    }

    /// Print the chart to `out` with ANSI colors
    ///
    /// # Errors
    /// Returns the writer's error
    pub fn print_colored<W: Write>(&self, out: &mut W) -> io::Result<()> {
        let buffer = self.render();
        let area = buffer.area;
        for y in area.top()..area.bottom() {
            for x in area.left()..area.right() {
                if let Some(cell) = buffer.cell((x, y)) {
                    queue!(out, SetForegroundColor(to_terminal_color(cell.fg)), Print(cell.symbol()))?;
                }
            }
            queue!(out, ResetColor, Print("\n"))?;
        }
        for (color, line) in self.legend() {
            queue!(out, SetForegroundColor(to_terminal_color(color)), Print(line), ResetColor, Print("\n"))?;
        }
        out.flush()
    }
}

fn to_terminal_color(color: Color) -> style::Color {
    match color {
        Color::Rgb(r, g, b) => style::Color::Rgb { r, g, b },
        Color::Black => style::Color::Black,
        _ => style::Color::Reset,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Pid;
    use crate::topology::{CpuEntry, TopologyConfig};
    use std::collections::{BTreeMap, BTreeSet};

    fn topology() -> CpuTopology {
        let entries = [
            CpuEntry { cpu: CpuId(0), core: 0, online: true },
            CpuEntry { cpu: CpuId(1), core: 0, online: true },
            CpuEntry { cpu: CpuId(2), core: 9, online: true },
        ];
        let config = TopologyConfig {
            performance_core_threshold: 8,
            smt_siblings: BTreeSet::from([CpuId(1)]),
        };
        CpuTopology::from_entries(&entries, &config).unwrap()
    }

    fn table(counts: &[(u32, u64)]) -> DimensionTable {
        DimensionTable {
            buckets: counts.iter().map(|(cpu, n)| (GroupKey::Cpu(CpuId(*cpu)), *n)).collect(),
            unattributed: 0,
        }
    }

    #[test]
    fn test_bars_colored_by_category() {
        let chart = Chart::build(Dimension::OnCpu, &table(&[(0, 5), (1, 2), (2, 7)]), Some(&topology()))
            .unwrap();
        let colors: Vec<Color> = chart.bars.iter().map(|bar| bar.color).collect();
        assert_eq!(colors, vec![PERFORMANCE_BLUE, SMT_GREEN, EFFICIENCY_ORANGE]);
    }

    #[test]
    fn test_unknown_cpu_fails_chart() {
        let err = Chart::build(Dimension::NewCpu, &table(&[(0, 1), (5, 1)]), Some(&topology()))
            .unwrap_err();
        assert_eq!(err, ClassificationError::UnknownCpu(CpuId(5)));
    }

    #[test]
    fn test_missing_topology_fails_chart() {
        let err = Chart::build(Dimension::OnCpu, &table(&[(0, 1)]), None).unwrap_err();
        assert_eq!(err, ClassificationError::NoTopology);
    }

    #[test]
    fn test_cpu_pid_buckets_skipped() {
        let mut buckets = BTreeMap::new();
        buckets.insert(GroupKey::CpuPid(CpuId(0), Pid(10)), 3);
        let table = DimensionTable { buckets, unattributed: 0 };
        let chart = Chart::build(Dimension::CpuPid, &table, Some(&topology())).unwrap();
        assert!(chart.bars.is_empty());
    }

    #[test]
    fn test_render_uses_bar_colors() {
        let chart = Chart::build(Dimension::OnCpu, &table(&[(0, 4), (2, 8)]), Some(&topology()))
            .unwrap();
        let buffer = chart.render();
        let area = buffer.area;
        let fg: Vec<Color> = (area.top()..area.bottom())
            .flat_map(|y| (area.left()..area.right()).map(move |x| (x, y)))
            .filter_map(|pos| buffer.cell(pos).map(|cell| cell.fg))
            .collect();
        assert!(fg.contains(&PERFORMANCE_BLUE));
        assert!(fg.contains(&EFFICIENCY_ORANGE));
        assert!(!fg.contains(&SMT_GREEN));
    }

    #[test]
    fn test_text_is_deterministic() {
        let chart = Chart::build(Dimension::OnCpu, &table(&[(0, 2), (1, 1)]), Some(&topology()))
            .unwrap();
        let text = chart.to_text();
        assert_eq!(text, chart.to_text());
        assert!(text.contains("Migrations per CPU (on-cpu)"));
        assert!(text.contains("blue = performance core"));
        assert!(text.contains("green = performance core, SMT sibling"));
        assert!(!text.contains("orange"));
        assert_eq!(text.lines().count(), usize::from(CHART_HEIGHT) + 2);
    }

    #[test]
    fn test_print_colored_emits_ansi() {
        let chart = Chart::build(Dimension::OnCpu, &table(&[(2, 3)]), Some(&topology())).unwrap();
        let mut out = Vec::new();
        chart.print_colored(&mut out).unwrap();
        let printed = String::from_utf8(out).unwrap();
        assert!(printed.contains("\u{1b}["));
        assert!(printed.contains("orange = efficiency core"));
    }
}
