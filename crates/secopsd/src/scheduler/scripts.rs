//! Script templates
//!
//! Every piece of shell, PowerShell or AppleScript text the adapters run is
//! built here. Values are substituted once, quoted for the target language,
//! into a variable block at the top of the script; the body only ever
//! references the variables.

use std::borrow::Cow;
use std::path::Path;

/// Title used for desktop notifications
pub const NOTIFICATION_TITLE: &str = "SecOps Notifier";

/// Process name the macOS notifier app runs as
pub const MAC_NOTIFIER_PROCESS: &str = "SecOpsRebootNotifier";

/// Quote a value for POSIX shells
pub fn sh_quote(value: &str) -> String {
    shell_escape::unix::escape(Cow::Borrowed(value)).into_owned()
}

/// Quote a value as a PowerShell single-quoted literal
pub fn ps_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Escape a value for use inside an AppleScript double-quoted string
pub fn applescript_escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

fn path_str(path: &Path) -> Cow<'_, str> {
    path.to_string_lossy()
}

/// Human wording for the reboot warning window
pub fn grace_wording(secs: u64) -> String {
    match secs {
        60 => "1 minute".to_string(),
        s if s >= 60 && s % 60 == 0 => format!("{} minutes", s / 60),
        1 => "1 second".to_string(),
        s => format!("{} seconds", s),
    }
}

// Shared shell body pieces

const SET_REBOOT_NOW_SED: &str = r#"'s/"reboot_now": *[^,}][^,}]*/"reboot_now": true/'"#;

fn update_json_fn(sed_in_place: &str) -> String {
    format!(
        r#"update_json() {{
    if command -v flock >/dev/null 2>&1; then
        (
            flock -x 200
            {sed} {expr} "$JSON_FILE"
        ) 200>"$LOCK_FILE"
    else
        {sed} {expr} "$JSON_FILE"
    fi
}}
"#,
        sed = sed_in_place,
        expr = SET_REBOOT_NOW_SED,
    )
}

const SLEEP_UNTIL_TARGET: &str = r#"SLEEP_PID=""
trap '[ -n "$SLEEP_PID" ] && kill "$SLEEP_PID" 2>/dev/null; exit 0' TERM INT
"#;

/// Background script for Linux: broadcast the reminder, sleep until the
/// scheduled time (or act at once if it is past or unparsable), then set
/// `reboot_now` in the document.
pub fn linux_task_script(json_file: &Path, reboot_time: &str, message: &str) -> String {
    let json = path_str(json_file);
    format!(
        r#"#!/bin/bash
JSON_FILE={json}
LOCK_FILE={lock}
REBOOT_TIME={time}
MESSAGE={message}

send_wall_message() {{
    echo "SecOps Solution - Reboot Required: $MESSAGE. Your system is scheduled to reboot at $REBOOT_TIME." | wall
}}

{update_json}
{sleep_setup}
send_wall_message

TARGET_TIMESTAMP=$(date -d "$REBOOT_TIME" +%s 2>/dev/null)
CURRENT_TIME=$(date +%s)
if [ -z "$TARGET_TIMESTAMP" ] || [ "$TARGET_TIMESTAMP" -le "$CURRENT_TIME" ]; then
    update_json
else
    sleep $((TARGET_TIMESTAMP - CURRENT_TIME)) &
    SLEEP_PID=$!
    wait "$SLEEP_PID"
    update_json
fi
"#,
        json = sh_quote(&json),
        lock = sh_quote(&format!("{}.lock", json)),
        time = sh_quote(reboot_time),
        message = sh_quote(message),
        update_json = update_json_fn("sed -i"),
        sleep_setup = SLEEP_UNTIL_TARGET,
    )
}

/// Background script for macOS: post a notification, sleep until the
/// scheduled time, set `reboot_now`, then bring up the notifier app if it
/// is installed and not already running.
pub fn mac_task_script(
    json_file: &Path,
    reboot_time: &str,
    message: &str,
    notifier_app: &Path,
) -> String {
    let json = path_str(json_file);
    let notice = format!(
        "SecOps Solution - Reboot Required: {}. Your system is scheduled to reboot at {}.",
        message, reboot_time
    );
    format!(
        r#"#!/bin/bash
JSON_FILE={json}
LOCK_FILE={lock}
REBOOT_TIME={time}
NOTIFIER_APP={app}

/usr/bin/osascript -e {notify}

check_notifier_running() {{
    pgrep -f {process} > /dev/null
}}

open_notifier() {{
    if [ -d "$NOTIFIER_APP" ] && ! check_notifier_running; then
        /usr/bin/open "$NOTIFIER_APP"
        /usr/bin/osascript -e {launching}
    fi
}}

{update_json}
{sleep_setup}
TARGET_TIMESTAMP=$(date -j -f "%Y-%m-%d %H:%M:%S" "$REBOOT_TIME" +%s 2>/dev/null)
CURRENT_TIME=$(date +%s)
if [ -z "$TARGET_TIMESTAMP" ] || [ "$TARGET_TIMESTAMP" -le "$CURRENT_TIME" ]; then
    update_json
    open_notifier
else
    sleep $((TARGET_TIMESTAMP - CURRENT_TIME)) &
    SLEEP_PID=$!
    wait "$SLEEP_PID"
    update_json
    open_notifier
fi
"#,
        json = sh_quote(&json),
        lock = sh_quote(&format!("{}.lock", json)),
        time = sh_quote(reboot_time),
        app = sh_quote(&path_str(notifier_app)),
        notify = sh_quote(&display_notification(&notice)),
        process = sh_quote(MAC_NOTIFIER_PROCESS),
        launching = sh_quote(&display_notification("Launching reboot notifier...")),
        update_json = update_json_fn("/usr/bin/sed -i ''"),
        sleep_setup = SLEEP_UNTIL_TARGET,
    )
}

/// Linux immediate reboot: warn logged-in users, wait the grace window,
/// reboot.
pub fn linux_reboot_now_script(message: &str, grace_secs: u64) -> String {
    let notice = format!(
        "SecOps Solution - Device Will Reboot Shortly: {}. Your system will reboot in {}.",
        message,
        grace_wording(grace_secs)
    );
    format!(
        r#"#!/bin/bash
wall {notice}
sleep {grace}
reboot
"#,
        notice = sh_quote(&notice),
        grace = grace_secs,
    )
}

/// macOS immediate reboot: notify, wait the grace window, notify, reboot.
pub fn mac_reboot_now_script(message: &str, grace_secs: u64) -> String {
    let notice = format!(
        "SecOps Solution - Device Will Reboot Shortly: {}. Your system will reboot in {}.",
        message,
        grace_wording(grace_secs)
    );
    format!(
        r#"#!/bin/bash
/usr/bin/osascript -e {notify}
sleep {grace}
/usr/bin/osascript -e {rebooting}
/sbin/shutdown -r now
"#,
        notify = sh_quote(&display_notification(&notice)),
        grace = grace_secs,
        rebooting = sh_quote(&display_notification("Rebooting now...")),
    )
}

/// AppleScript statement posting a notification
pub fn display_notification(message: &str) -> String {
    format!(
        r#"display notification "{}" with title "{}""#,
        applescript_escape(message),
        NOTIFICATION_TITLE
    )
}

// Windows (PowerShell)

const TASK_SETTINGS: &str = "$Settings=New-ScheduledTaskSettingsSet -AllowStartIfOnBatteries -DontStopIfGoingOnBatteries -StartWhenAvailable";

/// Remove the named task if it exists
pub fn ps_unregister_task(task_name: &str) -> String {
    format!(
        "$taskName={}; if (Get-ScheduledTask -TaskName $taskName -ErrorAction SilentlyContinue) {{ Unregister-ScheduledTask -TaskName $taskName -Confirm:$false }}",
        ps_quote(task_name)
    )
}

/// Register the notifier task for logged-in users.
///
/// With no time the trigger is "now" and the task is started right away.
pub fn ps_register_notifier_task(
    task_name: &str,
    notifier_exe: &Path,
    scheduled_time: Option<&str>,
) -> String {
    let (trigger_at, start) = match scheduled_time {
        Some(time) => (ps_quote(time), String::new()),
        None => (
            "(Get-Date)".to_string(),
            ";Start-ScheduledTask -TaskName $taskName".to_string(),
        ),
    };
    format!(
        "$taskName={name};$Action=New-ScheduledTaskAction -Execute {exe};{settings};$Trigger=New-ScheduledTaskTrigger -Once -At {at};$Principal=New-ScheduledTaskPrincipal -GroupId 'Users' -RunLevel Highest;Register-ScheduledTask -Action $Action -Trigger $Trigger -Principal $Principal -Settings $Settings -TaskName $taskName -Description 'SecOps Reboot Notifier'{start}",
        name = ps_quote(task_name),
        exe = ps_quote(&path_str(notifier_exe)),
        settings = TASK_SETTINGS,
        at = trigger_at,
        start = start,
    )
}

/// Register and start a SYSTEM task that reboots after the grace window
pub fn ps_register_reboot_now_task(task_name: &str, grace_secs: u64) -> String {
    format!(
        "$taskName={name};$Action=New-ScheduledTaskAction -Execute 'shutdown.exe' -Argument '/F /R /T {grace}';$Trigger=New-ScheduledTaskTrigger -Once -At (Get-Date);{settings};$Principal=New-ScheduledTaskPrincipal -UserId 'SYSTEM' -RunLevel Highest;Register-ScheduledTask -Action $Action -Trigger $Trigger -Principal $Principal -Settings $Settings -TaskName $taskName -Description {desc};Start-ScheduledTask -TaskName $taskName",
        name = ps_quote(task_name),
        grace = grace_secs,
        settings = TASK_SETTINGS,
        desc = ps_quote(&format!(
            "Reboot the machine with a {} delay",
            grace_wording(grace_secs)
        )),
    )
}

pub fn ps_stop_service(service_name: &str) -> String {
    format!("Stop-Service -Name {} -Force", ps_quote(service_name))
}

/// Grant BUILTIN\Users full control on a directory tree
pub fn ps_grant_users_full_control(dir: &Path) -> String {
    format!(
        r#"$d={dir};$rule=New-Object System.Security.AccessControl.FileSystemAccessRule('BUILTIN\Users','FullControl','Allow');Get-ChildItem -Path $d -Recurse | ForEach-Object {{ $acl=Get-Acl $_.FullName; $acl.SetAccessRule($rule); Set-Acl $_.FullName $acl }};$dirAcl=Get-Acl $d;$dirAcl.SetAccessRule($rule);Set-Acl $d $dirAcl"#,
        dir = ps_quote(&path_str(dir))
    )
}

/// Reports `A restart is required.` when either servicing key is present
pub const PS_REBOOT_PENDING_CHECK: &str = r"$progressPreference='SilentlyContinue'; $rebootPending=Test-Path 'HKLM:\SOFTWARE\Microsoft\Windows\CurrentVersion\Component Based Servicing\RebootPending'; $rebootRequired=Test-Path 'HKLM:\SOFTWARE\Microsoft\Windows\CurrentVersion\WindowsUpdate\Auto Update\RebootRequired'; if($rebootPending -or $rebootRequired){Write-Output 'A restart is required.'} else {Write-Output 'No restart required.'}";

/// Prints `System requires a reboot.` when any Linux signal fires
pub const LINUX_REBOOT_REQUIRED_CHECK: &str = r#"if [ -f /var/run/reboot-required ] || [ -f /var/run/reboot-required.pkgs ]; then echo "System requires a reboot."; exit 0; fi
if command -v zypper >/dev/null 2>&1; then if zypper ps -sss 2>/dev/null | grep -q '(deleted)'; then echo "System requires a reboot."; exit 0; fi; fi
if command -v needs-restarting >/dev/null 2>&1; then if ! needs-restarting -r >/dev/null 2>&1; then echo "System requires a reboot."; exit 0; fi; fi
echo "No reboot""#;

/// Prints the package manager in use (`apt`, `yum`, `zypper`) or nothing
pub const LINUX_PACKAGE_MANAGER_CHECK: &str = "if command -v apt >/dev/null 2>&1; then echo apt; elif command -v yum >/dev/null 2>&1; then echo yum; elif command -v zypper >/dev/null 2>&1; then echo zypper; fi";
