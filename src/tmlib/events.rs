use crate::domain::PtF;

/// Input of one frame, independent of the windowing library.
#[derive(Debug, Clone, Default)]
pub struct Events {
    events: Vec<Event>,
    pub mouse_pos_on_orig: Option<PtF>,
    /// where the pointer went down if a press happened in this frame
    pub press_pos_on_orig: Option<PtF>,
}

impl Events {
    pub fn mousepos_orig(mut self, mouse_pos: Option<PtF>) -> Self {
        self.mouse_pos_on_orig = mouse_pos;
        self
    }
    pub fn presspos_orig(mut self, press_pos: Option<PtF>) -> Self {
        self.press_pos_on_orig = press_pos;
        self
    }
    pub fn events(mut self, mut events: Vec<Event>) -> Self {
        self.events.append(&mut events);
        self
    }
    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.events.iter()
    }
}

#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum KeyCode {
    C,
    Q,
    S,
    Escape,
    MouseLeft,
    MouseRight,
    DontCare,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Pressed(KeyCode),
    Released(KeyCode),
    Held(KeyCode),
}

#[test]
fn test_events_keep_order() {
    let events = Events::default()
        .events(vec![Event::Pressed(KeyCode::MouseLeft), Event::Held(KeyCode::MouseLeft)])
        .events(vec![Event::Pressed(KeyCode::C)])
        .mousepos_orig(Some((1.0, 2.0).into()));
    assert_eq!(
        events.iter().copied().collect::<Vec<_>>(),
        vec![
            Event::Pressed(KeyCode::MouseLeft),
            Event::Held(KeyCode::MouseLeft),
            Event::Pressed(KeyCode::C)
        ]
    );
    assert_eq!(events.mouse_pos_on_orig, Some(PtF { x: 1.0, y: 2.0 }));
    assert_eq!(events.press_pos_on_orig, None);
}
