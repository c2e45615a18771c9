//! Win32 keystroke injection: `EnumWindows` + `SetForegroundWindow` to focus
//! the editor, `SendInput` to type.

use std::mem::size_of;

use anyhow::Result;
use tracing::debug;
use winapi::shared::minwindef::{BOOL, DWORD, FALSE, LPARAM, TRUE, UINT, WORD};
use winapi::shared::windef::HWND;
use winapi::um::winuser::{
    EnumWindows, GW_OWNER, GetWindow, GetWindowThreadProcessId, INPUT, INPUT_KEYBOARD, IsIconic,
    IsWindowVisible, KEYBDINPUT, KEYEVENTF_KEYUP, KEYEVENTF_UNICODE, SW_RESTORE, SendInput,
    SetForegroundWindow, ShowWindow, VK_BACK, VK_ESCAPE, VK_RETURN, VK_TAB,
};

use super::{Key, KeyInjector};
use crate::error::HarnessError;

#[derive(Debug, Default, Clone, Copy)]
pub struct Win32Injector;

struct WindowSearch {
    pid: DWORD,
    found: Option<HWND>,
}

unsafe extern "system" fn find_top_level_window(hwnd: HWND, lparam: LPARAM) -> BOOL {
    // SAFETY: `lparam` is the `&mut WindowSearch` passed to `EnumWindows`
    // below and outlives the enumeration.
    let search = unsafe { &mut *(lparam as *mut WindowSearch) };
    let mut window_pid: DWORD = 0;
    unsafe {
        GetWindowThreadProcessId(hwnd, &mut window_pid);
        if window_pid == search.pid
            && IsWindowVisible(hwnd) != 0
            && GetWindow(hwnd, GW_OWNER).is_null()
        {
            search.found = Some(hwnd);
            return FALSE;
        }
    }
    TRUE
}

fn keyboard_input(vk: WORD, scan: WORD, flags: DWORD) -> INPUT {
    // SAFETY: INPUT is plain data; all-zero is a valid value.
    let mut input: INPUT = unsafe { std::mem::zeroed() };
    input.type_ = INPUT_KEYBOARD;
    unsafe {
        *input.u.ki_mut() = KEYBDINPUT {
            wVk: vk,
            wScan: scan,
            dwFlags: flags,
            time: 0,
            dwExtraInfo: 0,
        };
    }
    input
}

fn push_virtual_key(inputs: &mut Vec<INPUT>, vk: i32) {
    inputs.push(keyboard_input(vk as WORD, 0, 0));
    inputs.push(keyboard_input(vk as WORD, 0, KEYEVENTF_KEYUP));
}

fn build_inputs(keys: &[Key]) -> Vec<INPUT> {
    let mut inputs = Vec::with_capacity(keys.len() * 2);
    for key in keys {
        match key {
            Key::Char(c) => {
                let mut units = [0u16; 2];
                for unit in c.encode_utf16(&mut units) {
                    inputs.push(keyboard_input(0, *unit, KEYEVENTF_UNICODE));
                    inputs.push(keyboard_input(0, *unit, KEYEVENTF_UNICODE | KEYEVENTF_KEYUP));
                }
            }
            Key::Enter => push_virtual_key(&mut inputs, VK_RETURN),
            Key::Escape => push_virtual_key(&mut inputs, VK_ESCAPE),
            Key::Tab => push_virtual_key(&mut inputs, VK_TAB),
            Key::Backspace => push_virtual_key(&mut inputs, VK_BACK),
        }
    }
    inputs
}

impl KeyInjector for Win32Injector {
    fn activate(&self, pid: u32) -> Result<()> {
        let mut search = WindowSearch { pid, found: None };
        unsafe {
            EnumWindows(
                Some(find_top_level_window),
                &mut search as *mut WindowSearch as LPARAM,
            );
        }

        let hwnd = search
            .found
            .ok_or_else(|| HarnessError::Injection(format!("no visible window for pid {pid}")))?;

        let activated = unsafe {
            if IsIconic(hwnd) != 0 {
                ShowWindow(hwnd, SW_RESTORE);
            }
            SetForegroundWindow(hwnd)
        };
        if activated == 0 {
            return Err(HarnessError::Injection(format!(
                "SetForegroundWindow refused window of pid {pid}"
            ))
            .into());
        }

        debug!(pid, "window activated");
        Ok(())
    }

    fn send(&self, keys: &[Key]) -> Result<()> {
        let mut inputs = build_inputs(keys);
        if inputs.is_empty() {
            return Ok(());
        }

        let sent = unsafe {
            SendInput(
                inputs.len() as UINT,
                inputs.as_mut_ptr(),
                size_of::<INPUT>() as i32,
            )
        };
        if sent as usize != inputs.len() {
            return Err(HarnessError::Injection(format!(
                "SendInput accepted {sent} of {} events",
                inputs.len()
            ))
            .into());
        }
        Ok(())
    }
}
