//! In-memory page that replays a fixed sequence of captured result pages.
//!
//! Each [`FixturePage`] is a small node tree. A node matches a selector when
//! the selector string is listed among the node's own selectors, which keeps
//! fixtures independent of a real CSS engine. Clicking the node marked as the
//! pager advances to the next fixture, unless the fixture is set to stall.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use super::{BrowserError, Page, SessionFactory};
use crate::extract::RowLocatorSet;

#[derive(Debug, Clone, Default)]
pub struct Node {
    selectors: Vec<String>,
    text: String,
    attrs: HashMap<String, String>,
    children: Vec<Node>,
    pager: bool,
}

impl Node {
    pub fn new<I, S>(selectors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            selectors: selectors.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn text(mut self, text: &str) -> Self {
        self.text = text.to_string();
        self
    }

    pub fn attr(mut self, name: &str, value: &str) -> Self {
        self.attrs.insert(name.to_string(), value.to_string());
        self
    }

    pub fn child(mut self, child: Node) -> Self {
        self.children.push(child);
        self
    }

    /// Clicking this node moves to the next fixture page.
    pub fn pager(mut self) -> Self {
        self.pager = true;
        self
    }

    fn matches(&self, selector: &str) -> bool {
        self.selectors.iter().any(|s| s == selector)
    }

    fn collect_matches(&self, selector: &str, out: &mut Vec<Node>) {
        for child in &self.children {
            if child.matches(selector) {
                out.push(child.clone());
            }
            child.collect_matches(selector, out);
        }
    }

    /// Text of this node followed by its descendants', space separated.
    fn full_text(&self) -> String {
        let mut parts = vec![self.text.clone()];
        parts.extend(self.children.iter().map(Node::full_text));
        parts
            .into_iter()
            .filter(|p| !p.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// One trend row as it appears on the dashboard.
#[derive(Debug, Clone)]
pub struct RowFixture {
    pub title: Option<String>,
    pub volume: Option<String>,
    pub time_started: Option<String>,
    pub active: bool,
    pub breakdown: Vec<String>,
}

impl RowFixture {
    pub fn new(title: &str, volume: &str, time_started: &str) -> Self {
        Self {
            title: Some(title.to_string()),
            volume: Some(volume.to_string()),
            time_started: Some(time_started.to_string()),
            active: false,
            breakdown: Vec::new(),
        }
    }

    pub fn active(mut self) -> Self {
        self.active = true;
        self
    }

    pub fn breakdown(mut self, terms: &[&str]) -> Self {
        self.breakdown = terms.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn without_volume(mut self) -> Self {
        self.volume = None;
        self
    }

    pub fn without_title(mut self) -> Self {
        self.title = None;
        self
    }

    fn to_node(&self, loc: &RowLocatorSet) -> Node {
        let mut row = Node::new([loc.rows.primary()]);
        if let Some(title) = &self.title {
            row = row.child(Node::new([loc.title.primary()]).text(title));
        }
        if let Some(volume) = &self.volume {
            row = row.child(Node::new([loc.volume.primary()]).text(volume));
        }
        if let Some(time) = &self.time_started {
            row = row.child(Node::new([loc.time_started.primary()]).text(time));
        }
        let class = if self.active {
            format!("status {}", loc.active_marker_class)
        } else {
            "status".to_string()
        };
        row = row.child(Node::new([loc.status_marker.primary()]).attr("class", &class));
        for term in &self.breakdown {
            row = row.child(Node::new([loc.breakdown.primary()]).text(term));
        }
        row
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextFixture {
    Enabled,
    Disabled,
    Absent,
}

#[derive(Debug, Clone, Default)]
pub struct FixturePage {
    root: Node,
    /// Clicking next leaves the content untouched.
    stall: bool,
    /// Clicking anything fails with a driver error.
    jam: bool,
}

impl FixturePage {
    pub fn from_nodes(nodes: Vec<Node>) -> Self {
        let mut root = Node::default();
        root.children = nodes;
        Self {
            root,
            stall: false,
            jam: false,
        }
    }

    /// Rows plus a next-page control, laid out with the given locators.
    pub fn rows(loc: &RowLocatorSet, rows: &[RowFixture], next: NextFixture) -> Self {
        let mut nodes: Vec<Node> = rows.iter().map(|r| r.to_node(loc)).collect();
        match next {
            NextFixture::Enabled => nodes.push(Node::new([loc.next_button.primary()]).pager()),
            NextFixture::Disabled => nodes.push(
                Node::new([loc.next_button.primary()])
                    .attr("disabled", "true")
                    .pager(),
            ),
            NextFixture::Absent => {}
        }
        Self::from_nodes(nodes)
    }

    /// A page that never shows any rows.
    pub fn blank() -> Self {
        Self::from_nodes(vec![Node::new(["body"])])
    }

    pub fn stalled(mut self) -> Self {
        self.stall = true;
        self
    }

    pub fn jammed(mut self) -> Self {
        self.jam = true;
        self
    }
}

#[derive(Debug)]
struct ScriptState {
    index: usize,
    visited: Vec<String>,
    clicks: usize,
}

#[derive(Debug)]
pub struct ScriptedPage {
    pages: Vec<FixturePage>,
    state: Mutex<ScriptState>,
    fail_navigation: bool,
}

impl ScriptedPage {
    pub fn new(pages: Vec<FixturePage>) -> Self {
        Self {
            pages,
            state: Mutex::new(ScriptState {
                index: 0,
                visited: Vec::new(),
                clicks: 0,
            }),
            fail_navigation: false,
        }
    }

    /// Every `navigate` call fails, as if the site were unreachable.
    pub fn unreachable() -> Self {
        Self {
            fail_navigation: true,
            ..Self::new(Vec::new())
        }
    }

    pub fn visited(&self) -> Vec<String> {
        self.lock().visited.clone()
    }

    pub fn clicks(&self) -> usize {
        self.lock().clicks
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn current(&self) -> Option<&FixturePage> {
        self.pages.get(self.lock().index)
    }
}

impl Page for ScriptedPage {
    type Element = Node;

    async fn navigate(&self, url: &str) -> Result<(), BrowserError> {
        let mut state = self.lock();
        state.visited.push(url.to_string());
        if self.fail_navigation {
            return Err(BrowserError::Navigation(format!("{} unreachable", url)));
        }
        state.index = 0;
        Ok(())
    }

    async fn query_all(&self, selector: &str) -> Result<Vec<Node>, BrowserError> {
        let mut out = Vec::new();
        if let Some(page) = self.current() {
            page.root.collect_matches(selector, &mut out);
        }
        Ok(out)
    }

    async fn query_within(&self, element: &Node, selector: &str) -> Result<Vec<Node>, BrowserError> {
        let mut out = Vec::new();
        element.collect_matches(selector, &mut out);
        Ok(out)
    }

    async fn text(&self, element: &Node) -> Result<String, BrowserError> {
        Ok(element.full_text())
    }

    async fn attribute(&self, element: &Node, name: &str) -> Result<Option<String>, BrowserError> {
        Ok(element.attrs.get(name).cloned())
    }

    async fn click(&self, element: &Node) -> Result<(), BrowserError> {
        let mut state = self.lock();
        state.clicks += 1;
        if self.pages.get(state.index).is_some_and(|p| p.jam) {
            return Err(BrowserError::Driver("element click intercepted".into()));
        }
        let stall = self.pages.get(state.index).is_some_and(|p| p.stall);
        if element.pager && !stall && state.index + 1 < self.pages.len() {
            state.index += 1;
        }
        Ok(())
    }
}

/// Hands out pre-built scripted pages in order, one per `open`.
#[derive(Debug, Default)]
pub struct ScriptedFactory {
    queue: Mutex<VecDeque<Result<ScriptedPage, String>>>,
    opened: AtomicUsize,
    closed: AtomicUsize,
}

impl ScriptedFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(self, page: ScriptedPage) -> Self {
        self.lock().push_back(Ok(page));
        self
    }

    /// The next `open` fails as if the browser could not start.
    pub fn push_failure(self, message: &str) -> Self {
        self.lock().push_back(Err(message.to_string()));
        self
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<Result<ScriptedPage, String>>> {
        self.queue.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl SessionFactory for ScriptedFactory {
    type Page = ScriptedPage;

    async fn open(&self) -> Result<ScriptedPage, BrowserError> {
        let next = self.lock().pop_front();
        match next {
            Some(Ok(page)) => {
                self.opened.fetch_add(1, Ordering::SeqCst);
                Ok(page)
            }
            Some(Err(msg)) => Err(BrowserError::Session(msg)),
            None => Err(BrowserError::Session("no scripted session left".into())),
        }
    }

    async fn close(&self, _page: ScriptedPage) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}
