/// Instanced grain quad shader
pub fn grain() -> &'static str {
    include_str!("grain.wgsl")
}
