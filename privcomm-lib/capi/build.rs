/*
 * Copyright (C) 2015-2023 IoT.bzh Company
 * Author: Fulup Ar Foll <fulup@iot.bzh>
 *
 * Redpesk interface code/config use MIT License and can be freely copy/modified even within proprietary code
 * License: $RP_BEGIN_LICENSE$ SPDX:MIT https://opensource.org/licenses/MIT $RP_END_LICENSE$
 *
*/

fn main() {
    // invalidate the built crate whenever the wrapper changes
    println!("cargo:rerun-if-changed=capi/capi-map.h");

    let header = "
    // -----------------------------------------------------------------------
    //         <- private 'privcomm' Rust/C unsafe binding ->
    // -----------------------------------------------------------------------
    //   Do not edit this file it will be regenerated automatically by cargo.
    //   Check:
    //     - build.rs for C/Rust glue options
    //     - capi/capi-map.h for C prototype inputs
    // -----------------------------------------------------------------------
    ";
    let libcapi = bindgen::Builder::default()
        .header("capi/capi-map.h")
        .raw_line(header)
        .parse_callbacks(Box::new(bindgen::CargoCallbacks::new()))
        .derive_debug(false)
        .layout_tests(false)
        .allowlist_function("__errno_location")
        .allowlist_function("strerror_r")
        .allowlist_function("socket")
        .allowlist_function("bind")
        .allowlist_function("recvfrom")
        .allowlist_function("sendto")
        .allowlist_function("fcntl")
        .allowlist_function("open")
        .allowlist_function("read")
        .allowlist_function("write")
        .allowlist_function("close")
        .allowlist_function("tcgetattr")
        .allowlist_function("tcsetattr")
        .allowlist_function("cfmakeraw")
        .allowlist_function("cfsetispeed")
        .allowlist_function("cfsetospeed")
        .allowlist_type("sockaddr_in")
        .allowlist_type("sockaddr")
        .allowlist_type("socklen_t")
        .allowlist_type("termios")
        .allowlist_var("INET_.*")
        .allowlist_var("CLIB_.*")
        .generate()
        .expect("Unable to generate privcomm capi");

    libcapi
        .write_to_file("capi/_capi-map.rs")
        .expect("Couldn't write privcomm capi!");
}
