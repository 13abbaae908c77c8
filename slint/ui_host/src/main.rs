slint::include_modules!();

scriptui_host_runtime::host_main!(AppWindow, MessageWindow);
