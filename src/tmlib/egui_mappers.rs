use crate::{
    domain::{PtF, ShapeI, TPtF},
    events::{Event, KeyCode},
};

#[derive(Debug, Default)]
pub struct LastSensedBtns {
    pub btn_codes: Vec<KeyCode>,
}
impl LastSensedBtns {
    pub fn is_empty(&self) -> bool {
        self.btn_codes.is_empty()
    }
}

pub fn map_key(egui_key: egui::Key) -> Option<KeyCode> {
    match egui_key {
        egui::Key::C => Some(KeyCode::C),
        egui::Key::Q => Some(KeyCode::Q),
        egui::Key::S => Some(KeyCode::S),
        egui::Key::Escape => Some(KeyCode::Escape),
        _ => None,
    }
}

pub fn map_key_events(ui: &mut egui::Ui) -> Vec<Event> {
    let mut events = vec![];
    ui.input(|i| {
        for e in &i.events {
            if let egui::Event::Key {
                key,
                pressed,
                repeat,
                ..
            } = e
            {
                if let Some(k) = map_key(*key) {
                    if !pressed {
                        events.push(Event::Released(k));
                    } else if !repeat {
                        events.push(Event::Pressed(k));
                        events.push(Event::Held(k));
                    } else {
                        events.push(Event::Held(k));
                    }
                }
            }
        }
    });
    events
}

fn push_btn_event(events: &mut Vec<Event>, last_sensed: &LastSensedBtns, f: fn(KeyCode) -> Event) {
    if last_sensed.btn_codes.contains(&KeyCode::MouseLeft) {
        events.push(f(KeyCode::MouseLeft));
    } else if last_sensed.btn_codes.contains(&KeyCode::MouseRight) {
        events.push(f(KeyCode::MouseRight));
    }
}

/// Translates pointer interaction with the tile widget into press, held and release events.
pub fn map_mouse_events(
    ui: &mut egui::Ui,
    last_sensed: &mut LastSensedBtns,
    image_response: &egui::Response,
) -> Vec<Event> {
    let mut events = vec![];
    let mut btn_codes = LastSensedBtns::default();
    ui.input(|i| {
        for e in &i.events {
            if let egui::Event::PointerButton { button, .. } = e {
                let btn_code = match button {
                    egui::PointerButton::Primary => KeyCode::MouseLeft,
                    egui::PointerButton::Secondary => KeyCode::MouseRight,
                    _ => KeyCode::DontCare,
                };
                btn_codes.btn_codes.push(btn_code);
            }
        }
    });
    if !btn_codes.is_empty() {
        *last_sensed = btn_codes;
    }
    if image_response.drag_started() {
        push_btn_event(&mut events, last_sensed, Event::Pressed);
    }
    if image_response.dragged() {
        push_btn_event(&mut events, last_sensed, Event::Held);
    }
    if image_response.clicked()
        || image_response.secondary_clicked()
        || image_response.drag_stopped()
    {
        push_btn_event(&mut events, last_sensed, Event::Released);
        *last_sensed = LastSensedBtns::default();
    }
    events
}

/// Maps a position on the screen to pixel coordinates of the tile shown in `rect`.
pub fn egui_pos_2_orig_pos(pos: egui::Pos2, rect: egui::Rect, shape_orig: ShapeI) -> PtF {
    let rel_x = TPtF::from((pos.x - rect.min.x) / rect.width().max(1.0));
    let rel_y = TPtF::from((pos.y - rect.min.y) / rect.height().max(1.0));
    shape_orig.clamp(PtF {
        x: rel_x * TPtF::from(shape_orig.w),
        y: rel_y * TPtF::from(shape_orig.h),
    })
}

#[test]
fn test_keys() {
    assert_eq!(map_key(egui::Key::C), Some(KeyCode::C));
    assert_eq!(map_key(egui::Key::S), Some(KeyCode::S));
    assert_eq!(map_key(egui::Key::Q), Some(KeyCode::Q));
    assert_eq!(map_key(egui::Key::A), None);
}

#[test]
fn test_pos_mapping() {
    let rect = egui::Rect::from_min_size(egui::pos2(10.0, 20.0), egui::vec2(320.0, 320.0));
    let shape = ShapeI::square(640);
    assert_eq!(
        egui_pos_2_orig_pos(egui::pos2(60.0, 70.0), rect, shape),
        PtF { x: 100.0, y: 100.0 }
    );
    assert_eq!(
        egui_pos_2_orig_pos(egui::pos2(0.0, 1000.0), rect, shape),
        PtF { x: 0.0, y: 639.0 }
    );
}
