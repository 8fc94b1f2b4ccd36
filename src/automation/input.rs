//! Mouse and keyboard input simulation.
//!
//! Uses SendInput, which produces hardware-level input that chat clients
//! accept. It moves the real cursor and types into whatever has focus.

use std::mem;
use std::thread;
use std::time::Duration;

use windows::Win32::UI::Input::KeyboardAndMouse::{
    INPUT, INPUT_0, INPUT_KEYBOARD, INPUT_MOUSE, KEYBD_EVENT_FLAGS, KEYBDINPUT, KEYEVENTF_KEYUP,
    KEYEVENTF_UNICODE, MOUSEEVENTF_ABSOLUTE, MOUSEEVENTF_LEFTDOWN, MOUSEEVENTF_LEFTUP,
    MOUSEEVENTF_MOVE, MOUSEEVENTF_VIRTUALDESK, MOUSEINPUT, MOUSE_EVENT_FLAGS, SendInput, VIRTUAL_KEY, VK_A,
    VK_CONTROL, VK_DELETE, VK_RETURN, VK_SHIFT,
};

use crate::capture::GdiCapture;
use crate::error::AutomationError;

fn send(inputs: &[INPUT]) -> Result<(), AutomationError> {
    let sent = unsafe { SendInput(inputs, mem::size_of::<INPUT>() as i32) };
    if sent as usize != inputs.len() {
        return Err(AutomationError::Input(format!(
            "SendInput accepted {} of {} events",
            sent,
            inputs.len()
        )));
    }
    Ok(())
}

fn mouse(dx: i32, dy: i32, flags: MOUSE_EVENT_FLAGS) -> INPUT {
    INPUT {
        r#type: INPUT_MOUSE,
        Anonymous: INPUT_0 {
            mi: MOUSEINPUT {
                dx,
                dy,
                dwFlags: flags | MOUSEEVENTF_ABSOLUTE | MOUSEEVENTF_VIRTUALDESK | MOUSEEVENTF_MOVE,
                ..Default::default()
            },
        },
    }
}

fn key(vk: VIRTUAL_KEY, scan: u16, flags: KEYBD_EVENT_FLAGS) -> INPUT {
    INPUT {
        r#type: INPUT_KEYBOARD,
        Anonymous: INPUT_0 {
            ki: KEYBDINPUT {
                wVk: vk,
                wScan: scan,
                dwFlags: flags,
                time: 0,
                dwExtraInfo: 0,
            },
        },
    }
}

/// Left-clicks at a virtual-screen position.
pub fn click_at(x: i32, y: i32) -> Result<(), AutomationError> {
    let screen = GdiCapture::virtual_screen();
    if screen.width < 2 || screen.height < 2 {
        return Err(AutomationError::Input("virtual screen is empty".to_string()));
    }

    // Normalize to 0-65535 across the virtual desktop (MOUSEEVENTF_VIRTUALDESK)
    let norm_x = ((x - screen.x) as i64 * 65535 / (screen.width as i64 - 1)) as i32;
    let norm_y = ((y - screen.y) as i64 * 65535 / (screen.height as i64 - 1)) as i32;

    log::debug!("Click at ({}, {}) normalized ({}, {})", x, y, norm_x, norm_y);

    send(&[mouse(norm_x, norm_y, MOUSE_EVENT_FLAGS(0))])?;
    thread::sleep(Duration::from_millis(50));
    send(&[mouse(norm_x, norm_y, MOUSEEVENTF_LEFTDOWN)])?;
    thread::sleep(Duration::from_millis(50));
    send(&[mouse(norm_x, norm_y, MOUSEEVENTF_LEFTUP)])
}

fn chord(modifier: VIRTUAL_KEY, vk: VIRTUAL_KEY) -> Result<(), AutomationError> {
    send(&[
        key(modifier, 0, KEYBD_EVENT_FLAGS(0)),
        key(vk, 0, KEYBD_EVENT_FLAGS(0)),
        key(vk, 0, KEYEVENTF_KEYUP),
        key(modifier, 0, KEYEVENTF_KEYUP),
    ])
}

pub fn press(vk: VIRTUAL_KEY) -> Result<(), AutomationError> {
    send(&[key(vk, 0, KEYBD_EVENT_FLAGS(0)), key(vk, 0, KEYEVENTF_KEYUP)])
}

pub fn press_enter() -> Result<(), AutomationError> {
    press(VK_RETURN)
}

/// Ctrl+A then Delete.
pub fn clear_field() -> Result<(), AutomationError> {
    chord(VK_CONTROL, VK_A)?;
    thread::sleep(Duration::from_millis(50));
    press(VK_DELETE)
}

/// Types `text` as Unicode key events. Line breaks become Shift+Enter so
/// multi-line messages are not sent early.
pub fn type_text(text: &str) -> Result<(), AutomationError> {
    for (i, line) in text.split('\n').enumerate() {
        if i > 0 {
            chord(VK_SHIFT, VK_RETURN)?;
        }
        let mut inputs = Vec::with_capacity(line.len() * 2);
        // UTF-16 units; characters outside the BMP go as surrogate pairs
        for unit in line.trim_end_matches('\r').encode_utf16() {
            inputs.push(key(VIRTUAL_KEY(0), unit, KEYEVENTF_UNICODE));
            inputs.push(key(VIRTUAL_KEY(0), unit, KEYEVENTF_UNICODE | KEYEVENTF_KEYUP));
        }
        if !inputs.is_empty() {
            send(&inputs)?;
        }
    }
    Ok(())
}
