//! Interaction state for one open session.
//!
//! [`SessionView`] is pure data plus a transition function: it never touches
//! the terminal or the store. The shell feeds it [`InputEvent`]s and acts on
//! the returned [`Effect`]; a store re-query round-trips through the shell
//! and lands back here via [`SessionView::commit_filter`] or
//! [`SessionView::abort_filter`], so nothing in this module can block.

use tracing::debug;

use crate::diff::{diff_records, DiffResult};
use crate::filter::FilterSet;
use crate::model::PacketRecord;

/// Packets jumped over by a page navigation.
const PAGE_JUMP: usize = 10;

/// What the operator is doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Browsing,
    FilterInput,
    Comparing,
}

/// Cursor movement requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Navigate {
    Next,
    Prev,
    PageNext,
    PagePrev,
    First,
    Last,
}

/// One named key event, already mapped from the terminal by the shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputEvent {
    Navigate(Navigate),
    ScrollUp,
    ScrollDown,
    ToggleView,
    EnterFilter,
    EditFilterChar(char),
    Backspace,
    ConfirmFilter,
    CancelFilter,
    MarkBaseline,
    CancelCompare,
    Quit,
}

/// What the shell must do after a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    None,
    /// Re-run the store query with this filter; commit or abort afterwards.
    ApplyFilter(FilterSet),
    /// Leave the session view.
    Exit,
}

/// A loaded session plus everything the renderer needs to draw it.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionView {
    packets: Vec<PacketRecord>,
    cursor: usize,
    mode: Mode,
    baseline: Option<usize>,
    applied_filter: Option<FilterSet>,
    pending_filter: String,
    show_hex: bool,
    details_scroll: u16,
    diff_scroll: u16,
}

impl SessionView {
    /// A freshly opened session: browsing, no filter, no baseline.
    pub fn new(packets: Vec<PacketRecord>) -> SessionView {
        SessionView {
            packets,
            cursor: 0,
            mode: Mode::Browsing,
            baseline: None,
            applied_filter: None,
            pending_filter: String::new(),
            show_hex: false,
            details_scroll: 0,
            diff_scroll: 0,
        }
    }

    pub fn packets(&self) -> &[PacketRecord] {
        &self.packets
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn baseline(&self) -> Option<usize> {
        self.baseline
    }

    pub fn applied_filter(&self) -> Option<&FilterSet> {
        self.applied_filter.as_ref()
    }

    pub fn pending_filter(&self) -> &str {
        &self.pending_filter
    }

    pub fn show_hex(&self) -> bool {
        self.show_hex
    }

    pub fn current(&self) -> Option<&PacketRecord> {
        self.packets.get(self.cursor)
    }

    pub fn baseline_record(&self) -> Option<&PacketRecord> {
        self.baseline.and_then(|i| self.packets.get(i))
    }

    pub fn is_on_baseline(&self) -> bool {
        self.baseline.is_some() && self.baseline == Some(self.cursor)
    }

    /// Comparison of the cursor packet against the baseline, recomputed on
    /// every call so a stale result can never be shown.
    pub fn current_diff(&self) -> Option<DiffResult> {
        if self.mode != Mode::Comparing {
            return None;
        }
        let baseline = self.baseline_record()?;
        let current = self.current()?;
        Some(diff_records(baseline, current))
    }

    /// The transition function. Pure: any store work the event implies is
    /// handed back to the caller as an [`Effect`].
    pub fn handle(&mut self, event: InputEvent) -> Effect {
        match self.mode {
            Mode::FilterInput => self.handle_filter_input(event),
            Mode::Browsing | Mode::Comparing => self.handle_browse(event),
        }
    }

    fn handle_browse(&mut self, event: InputEvent) -> Effect {
        match event {
            InputEvent::Navigate(nav) => {
                self.navigate(nav);
                Effect::None
            }
            InputEvent::ScrollUp => {
                let scroll = self.active_scroll_mut();
                *scroll = scroll.saturating_sub(1);
                Effect::None
            }
            InputEvent::ScrollDown => {
                let scroll = self.active_scroll_mut();
                *scroll = scroll.saturating_add(1);
                Effect::None
            }
            InputEvent::ToggleView => {
                self.show_hex = !self.show_hex;
                self.reset_scroll();
                Effect::None
            }
            InputEvent::EnterFilter => {
                self.pending_filter = self.applied_filter_text();
                self.set_mode(Mode::FilterInput);
                Effect::None
            }
            InputEvent::MarkBaseline => {
                // Re-marking while comparing just moves the baseline.
                if !self.packets.is_empty() {
                    self.baseline = Some(self.cursor);
                    self.reset_scroll();
                    self.set_mode(Mode::Comparing);
                }
                Effect::None
            }
            InputEvent::CancelCompare => {
                if self.mode == Mode::Comparing {
                    self.baseline = None;
                    self.reset_scroll();
                    self.set_mode(Mode::Browsing);
                    Effect::None
                } else {
                    Effect::Exit
                }
            }
            InputEvent::Quit => Effect::Exit,
            InputEvent::EditFilterChar(_)
            | InputEvent::Backspace
            | InputEvent::ConfirmFilter
            | InputEvent::CancelFilter => Effect::None,
        }
    }

    fn handle_filter_input(&mut self, event: InputEvent) -> Effect {
        match event {
            InputEvent::EditFilterChar(c) => {
                self.pending_filter.push(c);
                Effect::None
            }
            InputEvent::Backspace => {
                self.pending_filter.pop();
                Effect::None
            }
            InputEvent::ConfirmFilter => {
                // No mutation here: the shell queries the store and then
                // commits or aborts, so a failed query changes nothing.
                Effect::ApplyFilter(FilterSet::parse(&self.pending_filter))
            }
            InputEvent::CancelFilter => {
                self.pending_filter = self.applied_filter_text();
                self.leave_filter_input();
                Effect::None
            }
            // Inside the input line 'q' is text, not quit; the shell maps
            // printable keys to EditFilterChar before they get here.
            _ => Effect::None,
        }
    }

    /// Installs the result of a successful filter re-query. The cursor
    /// lands on the packet number closest to where the operator was, the
    /// baseline resets, and browsing resumes.
    pub fn commit_filter(&mut self, filter: FilterSet, packets: Vec<PacketRecord>) {
        let anchor = self
            .current()
            .map(|p| p.packet_number)
            .or_else(|| self.packets.first().map(|p| p.packet_number));

        self.applied_filter = if filter.is_empty() { None } else { Some(filter) };
        self.pending_filter = self.applied_filter_text();
        self.packets = packets;
        self.cursor = anchor.map_or(0, |n| self.closest_index(n));
        self.baseline = None;
        self.reset_scroll();
        self.set_mode(Mode::Browsing);
    }

    /// Returns to the pre-input mode after a failed re-query. Applied
    /// filter, baseline, packets and cursor all stay as they were; the
    /// typed text is kept so the operator can correct it.
    pub fn abort_filter(&mut self) {
        self.leave_filter_input();
    }

    fn leave_filter_input(&mut self) {
        let mode = if self.baseline.is_some() {
            Mode::Comparing
        } else {
            Mode::Browsing
        };
        self.set_mode(mode);
    }

    fn applied_filter_text(&self) -> String {
        self.applied_filter
            .as_ref()
            .map(FilterSet::to_string)
            .unwrap_or_default()
    }

    fn navigate(&mut self, nav: Navigate) {
        if self.packets.is_empty() {
            return;
        }
        let last = self.packets.len() - 1;
        let target = match nav {
            Navigate::Next => (self.cursor + 1).min(last),
            Navigate::Prev => self.cursor.saturating_sub(1),
            Navigate::PageNext => (self.cursor + PAGE_JUMP).min(last),
            Navigate::PagePrev => self.cursor.saturating_sub(PAGE_JUMP),
            Navigate::First => 0,
            Navigate::Last => last,
        };
        if target != self.cursor {
            self.cursor = target;
            self.reset_scroll();
        }
    }

    /// Index of the packet whose number is nearest the anchor; earlier
    /// packet wins a tie.
    fn closest_index(&self, anchor: u64) -> usize {
        let mut best = 0;
        let mut best_distance = u64::MAX;
        for (index, packet) in self.packets.iter().enumerate() {
            let distance = packet.packet_number.abs_diff(anchor);
            if distance < best_distance {
                best_distance = distance;
                best = index;
            }
        }
        best
    }

    fn active_scroll_mut(&mut self) -> &mut u16 {
        // While comparing the scroll keys drive the differences panel.
        if self.mode == Mode::Comparing && !self.show_hex {
            &mut self.diff_scroll
        } else {
            &mut self.details_scroll
        }
    }

    fn reset_scroll(&mut self) {
        self.details_scroll = 0;
        self.diff_scroll = 0;
    }

    /// Renderer clamp: content height is only known at draw time.
    pub fn clamp_details_scroll(&mut self, max: u16) -> u16 {
        if self.details_scroll > max {
            self.details_scroll = max;
        }
        self.details_scroll
    }

    pub fn clamp_diff_scroll(&mut self, max: u16) -> u16 {
        if self.diff_scroll > max {
            self.diff_scroll = max;
        }
        self.diff_scroll
    }

    fn set_mode(&mut self, mode: Mode) {
        if self.mode != mode {
            debug!(from = ?self.mode, to = ?mode, "mode change");
            self.mode = mode;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Direction, Value};
    use serde_json::json;

    fn packet(number: u64, payload: serde_json::Value) -> PacketRecord {
        PacketRecord {
            packet_number: number,
            timestamp_ms: 1_000 + number as i64 * 250,
            offset_ms: number as i64 * 250,
            direction: if number % 2 == 0 {
                Direction::Clientbound
            } else {
                Direction::Serverbound
            },
            name: Some(format!("packet_{number}")),
            value: Value::from_json(&payload),
            raw: None,
        }
    }

    fn view_with(count: u64) -> SessionView {
        SessionView::new((1..=count).map(|n| packet(n, json!({ "n": n }))).collect())
    }

    #[test]
    fn navigation_respects_bounds() {
        let mut view = view_with(3);
        assert_eq!(view.cursor(), 0);

        view.handle(InputEvent::Navigate(Navigate::Prev));
        assert_eq!(view.cursor(), 0);

        view.handle(InputEvent::Navigate(Navigate::Next));
        assert_eq!(view.cursor(), 1);

        view.handle(InputEvent::Navigate(Navigate::Last));
        assert_eq!(view.cursor(), 2);

        view.handle(InputEvent::Navigate(Navigate::Next));
        assert_eq!(view.cursor(), 2);

        view.handle(InputEvent::Navigate(Navigate::First));
        assert_eq!(view.cursor(), 0);
    }

    #[test]
    fn page_jumps_move_ten_and_clamp() {
        let mut view = view_with(25);
        view.handle(InputEvent::Navigate(Navigate::PageNext));
        assert_eq!(view.cursor(), 10);
        view.handle(InputEvent::Navigate(Navigate::PageNext));
        assert_eq!(view.cursor(), 20);
        view.handle(InputEvent::Navigate(Navigate::PageNext));
        assert_eq!(view.cursor(), 24);
        view.handle(InputEvent::Navigate(Navigate::PagePrev));
        assert_eq!(view.cursor(), 14);
    }

    #[test]
    fn navigation_on_empty_session_is_a_no_op() {
        let mut view = SessionView::new(Vec::new());
        assert_eq!(view.handle(InputEvent::Navigate(Navigate::Next)), Effect::None);
        assert_eq!(view.cursor(), 0);
        assert!(view.current().is_none());

        // Marking a baseline needs a packet under the cursor.
        view.handle(InputEvent::MarkBaseline);
        assert_eq!(view.mode(), Mode::Browsing);
        assert_eq!(view.baseline(), None);
    }

    #[test]
    fn moving_the_cursor_resets_scroll() {
        let mut view = view_with(5);
        view.handle(InputEvent::ScrollDown);
        view.handle(InputEvent::ScrollDown);
        assert_eq!(view.clamp_details_scroll(u16::MAX), 2);

        view.handle(InputEvent::Navigate(Navigate::Next));
        assert_eq!(view.clamp_details_scroll(u16::MAX), 0);

        // A clamped navigation that goes nowhere keeps the scroll.
        view.handle(InputEvent::ScrollDown);
        view.handle(InputEvent::Navigate(Navigate::First));
        view.handle(InputEvent::ScrollDown);
        view.handle(InputEvent::Navigate(Navigate::Prev));
        assert_eq!(view.clamp_details_scroll(u16::MAX), 1);
    }

    #[test]
    fn filter_input_seeds_from_applied_filter() {
        let mut view = view_with(3);
        view.handle(InputEvent::EnterFilter);
        assert_eq!(view.mode(), Mode::FilterInput);
        assert_eq!(view.pending_filter(), "");

        // Pretend a filter was applied earlier, then re-open the editor.
        view.handle(InputEvent::CancelFilter);
        view.commit_filter(
            FilterSet::parse("c.start_game,s"),
            view.packets().to_vec(),
        );
        view.handle(InputEvent::EnterFilter);
        assert_eq!(view.pending_filter(), "c.start_game,s");
    }

    #[test]
    fn filter_text_editing() {
        let mut view = view_with(3);
        view.handle(InputEvent::EnterFilter);
        for c in "s.login".chars() {
            view.handle(InputEvent::EditFilterChar(c));
        }
        assert_eq!(view.pending_filter(), "s.login");
        view.handle(InputEvent::Backspace);
        view.handle(InputEvent::Backspace);
        assert_eq!(view.pending_filter(), "s.log");
        // Backspace on empty text is harmless.
        let mut empty = view_with(1);
        empty.handle(InputEvent::EnterFilter);
        empty.handle(InputEvent::Backspace);
        assert_eq!(empty.pending_filter(), "");
    }

    #[test]
    fn confirm_emits_apply_without_mutating() {
        let mut view = view_with(5);
        view.handle(InputEvent::MarkBaseline);
        view.handle(InputEvent::EnterFilter);
        for c in "s.*".chars() {
            view.handle(InputEvent::EditFilterChar(c));
        }

        let before_baseline = view.baseline();
        let effect = view.handle(InputEvent::ConfirmFilter);
        assert_eq!(effect, Effect::ApplyFilter(FilterSet::parse("s.*")));

        // Nothing moved yet: the shell owns the query round-trip.
        assert_eq!(view.mode(), Mode::FilterInput);
        assert_eq!(view.applied_filter(), None);
        assert_eq!(view.baseline(), before_baseline);
        assert_eq!(view.packets().len(), 5);
    }

    #[test]
    fn commit_remaps_cursor_to_closest_packet_number() {
        let mut view = view_with(10);
        view.handle(InputEvent::Navigate(Navigate::Last)); // number 10
        for _ in 0..3 {
            view.handle(InputEvent::Navigate(Navigate::Prev)); // number 7
        }
        assert_eq!(view.current().map(|p| p.packet_number), Some(7));

        // New result set keeps only even numbers; 6 and 8 tie, 6 wins.
        let filtered: Vec<PacketRecord> = (1..=10u64)
            .filter(|n| n % 2 == 0)
            .map(|n| packet(n, json!({ "n": n })))
            .collect();
        view.handle(InputEvent::EnterFilter);
        view.commit_filter(FilterSet::parse("c"), filtered);

        assert_eq!(view.mode(), Mode::Browsing);
        assert_eq!(view.current().map(|p| p.packet_number), Some(6));
        assert_eq!(view.applied_filter().map(|f| f.to_string()), Some("c".to_string()));
        assert_eq!(view.pending_filter(), "c");
    }

    #[test]
    fn commit_clears_baseline_and_empty_filter_clears_applied() {
        let mut view = view_with(4);
        view.handle(InputEvent::MarkBaseline);
        assert_eq!(view.mode(), Mode::Comparing);

        view.handle(InputEvent::EnterFilter);
        view.commit_filter(FilterSet::parse(""), view.packets().to_vec());
        assert_eq!(view.mode(), Mode::Browsing);
        assert_eq!(view.baseline(), None);
        assert_eq!(view.applied_filter(), None);
        assert_eq!(view.pending_filter(), "");
    }

    #[test]
    fn abort_restores_prior_mode_and_keeps_everything() {
        let mut view = view_with(4);
        view.handle(InputEvent::Navigate(Navigate::Next));
        view.handle(InputEvent::MarkBaseline);
        view.handle(InputEvent::EnterFilter);
        for c in "c.oops".chars() {
            view.handle(InputEvent::EditFilterChar(c));
        }
        view.handle(InputEvent::ConfirmFilter);

        view.abort_filter();
        assert_eq!(view.mode(), Mode::Comparing);
        assert_eq!(view.baseline(), Some(1));
        assert_eq!(view.applied_filter(), None);
        assert_eq!(view.packets().len(), 4);
        // The typed text survives for correction.
        assert_eq!(view.pending_filter(), "c.oops");
    }

    #[test]
    fn cancel_filter_discards_pending_text() {
        let mut view = view_with(4);
        view.handle(InputEvent::EnterFilter);
        for c in "garbage".chars() {
            view.handle(InputEvent::EditFilterChar(c));
        }
        view.handle(InputEvent::CancelFilter);
        assert_eq!(view.mode(), Mode::Browsing);
        assert_eq!(view.pending_filter(), "");
        assert_eq!(view.applied_filter(), None);

        // From a comparing session, cancel returns to comparing.
        view.handle(InputEvent::MarkBaseline);
        view.handle(InputEvent::EnterFilter);
        assert_eq!(view.mode(), Mode::FilterInput);
        view.handle(InputEvent::CancelFilter);
        assert_eq!(view.mode(), Mode::Comparing);
        assert_eq!(view.baseline(), Some(0));
    }

    #[test]
    fn baseline_mark_remark_and_cancel() {
        let mut view = view_with(5);
        view.handle(InputEvent::MarkBaseline);
        assert_eq!(view.mode(), Mode::Comparing);
        assert_eq!(view.baseline(), Some(0));

        view.handle(InputEvent::Navigate(Navigate::Next));
        view.handle(InputEvent::Navigate(Navigate::Next));
        view.handle(InputEvent::MarkBaseline);
        assert_eq!(view.baseline(), Some(2));
        assert_eq!(view.mode(), Mode::Comparing);

        view.handle(InputEvent::CancelCompare);
        assert_eq!(view.mode(), Mode::Browsing);
        assert_eq!(view.baseline(), None);

        // With no baseline, the same event asks to leave the session.
        assert_eq!(view.handle(InputEvent::CancelCompare), Effect::Exit);
    }

    #[test]
    fn quit_exits_from_browsing_and_comparing() {
        let mut view = view_with(2);
        assert_eq!(view.handle(InputEvent::Quit), Effect::Exit);
        view.handle(InputEvent::MarkBaseline);
        assert_eq!(view.handle(InputEvent::Quit), Effect::Exit);
    }

    #[test]
    fn diff_follows_the_cursor_and_is_never_cached() {
        let packets = vec![
            packet(1, json!({ "hp": 20, "pos": { "x": 0 } })),
            packet(2, json!({ "hp": 19, "pos": { "x": 0 } })),
            packet(3, json!({ "hp": 19, "pos": { "x": 5 } })),
        ];
        let mut view = SessionView::new(packets);

        assert!(view.current_diff().is_none());

        view.handle(InputEvent::MarkBaseline);
        assert!(view.is_on_baseline());
        let identity = view.current_diff().unwrap();
        assert!(identity.is_identical());
        assert_eq!(identity.time_delta_ms, 0);

        view.handle(InputEvent::Navigate(Navigate::Next));
        let step1 = view.current_diff().unwrap();
        let changed: Vec<String> = step1.changes().map(|e| e.path.to_string()).collect();
        assert_eq!(changed, vec!["hp"]);
        assert_eq!(step1.time_delta_ms, 250);
        assert_eq!(step1.packet_delta, 1);

        view.handle(InputEvent::Navigate(Navigate::Next));
        let step2 = view.current_diff().unwrap();
        let changed: Vec<String> = step2.changes().map(|e| e.path.to_string()).collect();
        assert_eq!(changed, vec!["hp", "pos.x"]);

        // Recomputed per call: equal inputs, equal output, fresh value.
        assert_eq!(view.current_diff().unwrap(), step2);
    }

    #[test]
    fn toggle_view_flips_hex_and_resets_scroll() {
        let mut view = view_with(2);
        view.handle(InputEvent::ScrollDown);
        view.handle(InputEvent::ToggleView);
        assert!(view.show_hex());
        assert_eq!(view.clamp_details_scroll(u16::MAX), 0);
        view.handle(InputEvent::ToggleView);
        assert!(!view.show_hex());
    }

    #[test]
    fn scroll_targets_the_diff_panel_while_comparing() {
        let mut view = view_with(3);
        view.handle(InputEvent::MarkBaseline);
        view.handle(InputEvent::ScrollDown);
        view.handle(InputEvent::ScrollDown);
        assert_eq!(view.clamp_diff_scroll(u16::MAX), 2);
        assert_eq!(view.clamp_details_scroll(u16::MAX), 0);

        // In hex view the details panel scrolls instead.
        view.handle(InputEvent::ToggleView);
        view.handle(InputEvent::ScrollDown);
        assert_eq!(view.clamp_details_scroll(u16::MAX), 1);
    }

    #[test]
    fn same_events_same_state() {
        let script = [
            InputEvent::Navigate(Navigate::Next),
            InputEvent::MarkBaseline,
            InputEvent::Navigate(Navigate::PageNext),
            InputEvent::EnterFilter,
            InputEvent::EditFilterChar('s'),
            InputEvent::CancelFilter,
            InputEvent::Navigate(Navigate::Prev),
        ];
        let mut a = view_with(30);
        let mut b = view_with(30);
        for event in &script {
            a.handle(event.clone());
            b.handle(event.clone());
        }
        assert_eq!(a, b);
    }
}
