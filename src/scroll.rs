pub const DEFAULT_ROOT_MARGIN: f64 = 200.0;

/// Conditions under which the sentinel may request another page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScrollGate {
    pub has_next: bool,
    pub fetching: bool,
    pub len: usize,
}

impl ScrollGate {
    pub fn open(&self) -> bool {
        self.has_next && !self.fetching && self.len > 0
    }
}

/// Edge-triggered watcher for the end-of-list sentinel.
///
/// Fires at most once per transition into visibility. A visible observation
/// while the gate is closed does not use up the transition, so the trigger
/// fires as soon as the gate opens with the sentinel still on screen. After
/// firing, staying visible never fires again until an invisible observation
/// re-arms it.
#[derive(Debug, Clone)]
pub struct ScrollTrigger {
    root_margin: f64,
    fired: bool,
    connected: bool,
}

impl Default for ScrollTrigger {
    fn default() -> Self {
        Self::new(DEFAULT_ROOT_MARGIN)
    }
}

impl ScrollTrigger {
    pub fn new(root_margin: f64) -> Self {
        Self {
            root_margin: root_margin.max(0.0),
            fired: false,
            connected: true,
        }
    }

    pub fn root_margin(&self) -> f64 {
        self.root_margin
    }

    /// Whether a sentinel whose top edge sits at `sentinel_top` is within the
    /// margin below a viewport ending at `viewport_bottom`.
    pub fn sentinel_visible(&self, sentinel_top: f64, viewport_bottom: f64) -> bool {
        sentinel_top <= viewport_bottom + self.root_margin
    }

    pub fn observe(&mut self, visible: bool, gate: ScrollGate) -> bool {
        if !self.connected {
            return false;
        }
        if !visible {
            self.fired = false;
            return false;
        }
        if self.fired || !gate.open() {
            return false;
        }
        self.fired = true;
        true
    }

    /// A new list is a new sentinel: the next visible observation counts as an entry.
    pub fn rearm(&mut self) {
        self.fired = false;
    }

    pub fn disconnect(&mut self) {
        self.connected = false;
        self.fired = false;
    }
}
