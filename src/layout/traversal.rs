//! Layout Traversal
//!
//! Lazy walk over every widget of a set of dashboards, yielding
//! `(dashboard_id, tab_id, widget)` in document order. Tabbed dashboards
//! tag widgets with the tab's `localIdentifier`; legacy dashboards yield
//! `tab_id = None`. Nested `IDashboardLayout` widgets are yielded and then
//! descended into, up to [`TraversalConfig::max_depth`] levels.

use serde::{Deserialize, Serialize};

use super::widget::{Item, Section, Widget};
use super::Dashboard;
use crate::diagnostics::{DiagnosticCode, DiagnosticItem, ExtractionObserver};

/// Traversal limits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraversalConfig {
    /// Nested layouts below this depth are skipped and reported
    pub max_depth: usize,
}

impl Default for TraversalConfig {
    fn default() -> Self {
        Self { max_depth: 32 }
    }
}

/// One widget with its position
#[derive(Debug, Clone, Copy)]
pub struct LayoutWidget<'a> {
    pub dashboard_id: &'a str,
    pub tab_id: Option<&'a str>,
    pub widget: &'a Widget,
    /// 0 for top-level items
    pub depth: usize,
}

/// Walk all widgets of `dashboards`. Each call starts a fresh walk.
pub fn walk<'a>(
    dashboards: &'a [Dashboard],
    config: TraversalConfig,
    observer: &'a dyn ExtractionObserver,
) -> Widgets<'a> {
    Widgets {
        dashboards: dashboards.iter(),
        current: None,
        config,
        observer,
    }
}

/// Iterator returned by [`walk`]
pub struct Widgets<'a> {
    dashboards: std::slice::Iter<'a, Dashboard>,
    current: Option<DashboardCursor<'a>>,
    config: TraversalConfig,
    observer: &'a dyn ExtractionObserver,
}

impl<'a> Iterator for Widgets<'a> {
    type Item = LayoutWidget<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(cursor) = self.current.as_mut() {
                if let Some(found) = cursor.next_widget(self.config, self.observer) {
                    return Some(found);
                }
                self.current = None;
            }
            let dashboard = self.dashboards.next()?;
            self.current = Some(DashboardCursor::new(dashboard));
        }
    }
}

/// Position inside one dashboard
struct DashboardCursor<'a> {
    dashboard_id: &'a str,
    roots: std::vec::IntoIter<(Option<&'a str>, &'a [Section])>,
    tab_id: Option<&'a str>,
    stack: Vec<Frame<'a>>,
}

impl<'a> DashboardCursor<'a> {
    fn new(dashboard: &'a Dashboard) -> Self {
        let content = &dashboard.content;
        let roots: Vec<(Option<&'a str>, &'a [Section])> = if !content.tabs.is_empty() {
            content
                .tabs
                .iter()
                .map(|tab| (tab.local_identifier.as_deref(), tab.layout.sections.as_slice()))
                .collect()
        } else {
            content
                .layout
                .iter()
                .map(|layout| (None, layout.sections.as_slice()))
                .collect()
        };

        Self {
            dashboard_id: &dashboard.id,
            roots: roots.into_iter(),
            tab_id: None,
            stack: Vec::new(),
        }
    }

    fn next_widget(
        &mut self,
        config: TraversalConfig,
        observer: &dyn ExtractionObserver,
    ) -> Option<LayoutWidget<'a>> {
        loop {
            let Some(frame) = self.stack.last_mut() else {
                let (tab_id, sections) = self.roots.next()?;
                self.tab_id = tab_id;
                self.stack.push(Frame::new(sections, 0));
                continue;
            };

            let depth = frame.depth;
            let Some(item) = frame.next_item() else {
                self.stack.pop();
                continue;
            };
            let Some(widget) = item.widget.as_ref() else {
                continue;
            };

            if let Widget::NestedLayout(nested) = widget {
                if depth < config.max_depth {
                    self.stack.push(Frame::new(&nested.sections, depth + 1));
                } else {
                    observer.report(
                        DiagnosticItem::new(
                            self.dashboard_id,
                            DiagnosticCode::LayoutDepthExceeded,
                            format!("Nested layout below depth {} skipped", config.max_depth),
                        )
                        .with_context(format!("tab: {}", self.tab_id.unwrap_or("-"))),
                    );
                }
            }

            return Some(LayoutWidget {
                dashboard_id: self.dashboard_id,
                tab_id: self.tab_id,
                widget,
                depth,
            });
        }
    }
}

/// Items of a section list, flattened
struct Frame<'a> {
    sections: &'a [Section],
    section: usize,
    item: usize,
    depth: usize,
}

impl<'a> Frame<'a> {
    fn new(sections: &'a [Section], depth: usize) -> Self {
        Self {
            sections,
            section: 0,
            item: 0,
            depth,
        }
    }

    fn next_item(&mut self) -> Option<&'a Item> {
        while let Some(section) = self.sections.get(self.section) {
            if let Some(item) = section.items.get(self.item) {
                self.item += 1;
                return Some(item);
            }
            self.section += 1;
            self.item = 0;
        }
        None
    }
}
