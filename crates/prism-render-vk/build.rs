use std::{env, error::Error, fs, path::PathBuf};

// Vertex layout matches `scene::Vertex`:
//   binding 0, location 0: R32G32B32_SFLOAT (pos)
//   binding 0, location 1: R32G32B32_SFLOAT (color)
// Set 0 binding 0 matches `scene::FrameUniforms`.
const VS_SRC: &str = r#"
#version 450
layout(location = 0) in vec3 inPos;
layout(location = 1) in vec3 inColor;

layout(set = 0, binding = 0) uniform Frame {
    mat4 view_proj;
    mat4 model;
} u;

layout(location = 0) out vec3 vColor;

void main() {
    vColor = inColor;
    gl_Position = u.view_proj * u.model * vec4(inPos, 1.0);
}
"#;

const FS_SRC: &str = r#"
#version 450
layout(location = 0) in vec3 vColor;
layout(location = 0) out vec4 outColor;

void main() {
    outColor = vec4(vColor, 1.0);
}
"#;

fn main() -> Result<(), Box<dyn Error>> {
    let out = PathBuf::from(env::var("OUT_DIR")?);

    let comp = shaderc::Compiler::new().expect("shaderc compiler");
    let mut opts = shaderc::CompileOptions::new().expect("shaderc options");
    opts.set_target_env(
        shaderc::TargetEnv::Vulkan,
        shaderc::EnvVersion::Vulkan1_0 as u32,
    );
    opts.set_optimization_level(shaderc::OptimizationLevel::Performance);

    let shaders = [
        (VS_SRC, shaderc::ShaderKind::Vertex, "scene.vert"),
        (FS_SRC, shaderc::ShaderKind::Fragment, "scene.frag"),
    ];
    for (src, kind, name) in shaders {
        let spv = comp.compile_into_spirv(src, kind, name, "main", Some(&opts))?;
        fs::write(out.join(format!("{name}.spv")), spv.as_binary_u8())?;
    }

    println!("cargo:rerun-if-changed=build.rs");
    Ok(())
}
