fn main() {
    // ESP-IDF build configuration
    embuild::espidf::sysenv::output();

    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=sdkconfig.defaults");
}
