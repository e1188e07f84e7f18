use crate::chat::message::{Message, Role};

const DEFAULT_CONTENT_WIDTH: f32 = 680.0;
const USER_BUBBLE_MAX_WIDTH: f32 = 540.0;
const USER_BUBBLE_PADDING_X: f32 = 14.0;
const USER_BUBBLE_PADDING_Y: f32 = 10.0;
const ASSISTANT_LABEL_HEIGHT: f32 = 16.0;
const ASSISTANT_LABEL_GAP: f32 = 8.0;
const REASONING_HEADER_HEIGHT: f32 = 24.0;
const MESSAGE_GAP: f32 = 16.0;
const ESTIMATED_TEXT_LINE_HEIGHT: f32 = 18.0;
const ESTIMATED_CHAR_WIDTH: f32 = 7.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollBehavior {
    Smooth,
    Instant,
}

/// Scroll geometry of a measurable viewport.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewportMetrics {
    pub scroll_top: f32,
    pub scroll_height: f32,
    pub client_height: f32,
}

impl ViewportMetrics {
    pub fn new(scroll_top: f32, scroll_height: f32, client_height: f32) -> Self {
        Self {
            scroll_top,
            scroll_height,
            client_height,
        }
    }

    pub fn distance_from_bottom(&self) -> f32 {
        (self.scroll_height - self.scroll_top - self.client_height).max(0.0)
    }
}

/// Presentation surface the scroll controller drives.
pub trait Viewport {
    /// `None` while the viewport is not mounted or cannot be measured.
    fn metrics(&self) -> Option<ViewportMetrics>;

    fn scroll_to_bottom(&mut self, behavior: ScrollBehavior);

    /// Lays out a new render snapshot.
    fn sync_content(&mut self, messages: &[Message]);
}

/// Headless viewport that estimates row heights instead of measuring rendered text.
#[derive(Debug, Clone)]
pub struct VirtualViewport {
    mounted: bool,
    client_height: f32,
    content_width: f32,
    content_height: f32,
    scroll_top: f32,
    programmatic_scrolls: usize,
    last_behavior: Option<ScrollBehavior>,
}

impl VirtualViewport {
    pub fn new(client_height: f32) -> Self {
        Self {
            mounted: true,
            client_height,
            content_width: DEFAULT_CONTENT_WIDTH,
            content_height: 0.0,
            scroll_top: 0.0,
            programmatic_scrolls: 0,
            last_behavior: None,
        }
    }

    pub fn with_content_width(mut self, content_width: f32) -> Self {
        self.content_width = content_width.max(1.0);
        self
    }

    pub fn mount(&mut self) {
        self.mounted = true;
    }

    pub fn unmount(&mut self) {
        self.mounted = false;
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted
    }

    pub fn set_content_height(&mut self, content_height: f32) {
        self.content_height = content_height.max(0.0);
        self.scroll_top = self.scroll_top.min(self.max_scroll_top());
    }

    pub fn content_height(&self) -> f32 {
        self.content_height
    }

    /// User-driven absolute scroll. Returns the geometry a scroll listener would observe.
    pub fn scroll_to(&mut self, scroll_top: f32) -> ViewportMetrics {
        self.scroll_top = scroll_top.clamp(0.0, self.max_scroll_top());
        self.current_metrics()
    }

    pub fn scroll_by(&mut self, delta: f32) -> ViewportMetrics {
        self.scroll_to(self.scroll_top + delta)
    }

    pub fn programmatic_scrolls(&self) -> usize {
        self.programmatic_scrolls
    }

    pub fn last_behavior(&self) -> Option<ScrollBehavior> {
        self.last_behavior
    }

    fn max_scroll_top(&self) -> f32 {
        (self.content_height - self.client_height).max(0.0)
    }

    fn current_metrics(&self) -> ViewportMetrics {
        ViewportMetrics::new(self.scroll_top, self.content_height, self.client_height)
    }
}

impl Viewport for VirtualViewport {
    fn metrics(&self) -> Option<ViewportMetrics> {
        self.mounted.then(|| self.current_metrics())
    }

    fn scroll_to_bottom(&mut self, behavior: ScrollBehavior) {
        self.scroll_top = self.max_scroll_top();
        self.programmatic_scrolls += 1;
        self.last_behavior = Some(behavior);
    }

    fn sync_content(&mut self, messages: &[Message]) {
        let content_height = messages
            .iter()
            .map(|message| estimate_message_height(message, self.content_width) + MESSAGE_GAP)
            .sum();
        self.set_content_height(content_height);
    }
}

fn estimate_message_height(message: &Message, content_width: f32) -> f32 {
    match message.role {
        Role::User => {
            let bubble_width = content_width.min(USER_BUBBLE_MAX_WIDTH);
            let text_width = (bubble_width - USER_BUBBLE_PADDING_X * 2.0).max(1.0);
            estimate_text_height(&message.text(), text_width) + USER_BUBBLE_PADDING_Y * 2.0
        }
        Role::Assistant => {
            let mut total_height = ASSISTANT_LABEL_HEIGHT + ASSISTANT_LABEL_GAP;
            if message.has_reasoning() {
                total_height += REASONING_HEADER_HEIGHT
                    + estimate_text_height(&message.reasoning(), content_width);
            }
            total_height + estimate_text_height(&message.text(), content_width)
        }
    }
}

fn estimate_text_height(content: &str, width: f32) -> f32 {
    if content.is_empty() {
        return ESTIMATED_TEXT_LINE_HEIGHT;
    }

    let chars_per_line = (width / ESTIMATED_CHAR_WIDTH).floor().max(1.0) as usize;
    let mut line_count = 0usize;
    for line in content.lines() {
        let char_count = line.chars().count().max(1);
        line_count += char_count.div_ceil(chars_per_line);
    }

    // Trailing newline renders one more empty line.
    if content.ends_with('\n') {
        line_count += 1;
    }

    ESTIMATED_TEXT_LINE_HEIGHT * line_count.max(1) as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::message::Part;

    #[test]
    fn longer_content_grows_estimated_height() {
        let short = Message::assistant("a-1").with_part(Part::text("ok"));
        let long = Message::assistant("a-2").with_part(Part::text("word ".repeat(400)));

        assert!(estimate_message_height(&long, 680.0) > estimate_message_height(&short, 680.0));
        assert_eq!(
            estimate_text_height("line\n", 680.0),
            ESTIMATED_TEXT_LINE_HEIGHT * 2.0
        );
    }

    #[test]
    fn sync_content_keeps_scroll_inside_bounds() {
        let mut viewport = VirtualViewport::new(200.0);
        let messages = (0..40)
            .map(|index| Message::user(format!("u-{index}"), "some prompt text"))
            .collect::<Vec<_>>();
        viewport.sync_content(&messages);
        viewport.scroll_to_bottom(ScrollBehavior::Instant);

        let metrics = viewport.metrics().expect("mounted");
        assert_eq!(metrics.distance_from_bottom(), 0.0);

        viewport.sync_content(&messages[..2]);
        let metrics = viewport.metrics().expect("mounted");
        assert!(metrics.scroll_top <= (metrics.scroll_height - metrics.client_height).max(0.0));
    }

    #[test]
    fn unmounted_viewport_reports_no_metrics() {
        let mut viewport = VirtualViewport::new(200.0);
        viewport.unmount();
        assert!(viewport.metrics().is_none());
        assert!(!viewport.is_mounted());
    }
}
