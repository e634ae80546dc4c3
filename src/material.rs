pub const MAX_SHINE: u8 = 255;

/// 8-bit RGBA color as stored in model files.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const BLACK: Color = Color::rgb(0, 0, 0);
    pub const WHITE: Color = Color::rgb(255, 255, 255);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    pub const fn rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    pub fn to_f32(self) -> [f32; 4] {
        [self.r as f32 / 255.0, self.g as f32 / 255.0, self.b as f32 / 255.0, self.a as f32 / 255.0]
    }

    /// Color channels only, alpha replaced.
    pub fn with_alpha_f32(self, alpha: f32) -> [f32; 4] {
        let [r, g, b, _] = self.to_f32();
        [r, g, b, alpha]
    }
}

impl From<[u8; 3]> for Color {
    fn from([r, g, b]: [u8; 3]) -> Self {
        Color::rgb(r, g, b)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Material {
    pub name: String,
    pub diffuse: Color,
    pub specular: Color,
    pub ambient: Color,
    pub emission: Color,
    /// 0..=[`MAX_SHINE`].
    pub shine: u8,
    /// 0 is opaque, 1 is invisible.
    pub transparency: f32,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            diffuse: Color::WHITE,
            specular: Color::BLACK,
            ambient: Color::rgba(0, 0, 0, 0),
            emission: Color::BLACK,
            shine: 0,
            transparency: 0.0,
        }
    }
}

impl Material {
    pub fn alpha(&self) -> f32 {
        (1.0 - self.transparency).clamp(0.0, 1.0)
    }

    pub fn is_opaque(&self) -> bool {
        self.transparency <= 0.0
    }

    /// Shine rescaled to the 0..=128 exponent range of fixed function lighting.
    pub fn shininess(&self) -> f32 {
        128.0 * self.shine as f32 / MAX_SHINE as f32
    }
}

/// Identity of a material inside one model. Draw loops compare keys to skip redundant
/// uniform uploads.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MaterialKey {
    Default,
    Index(usize),
}

#[derive(Clone, Debug, PartialEq)]
pub struct DisplayMaterial {
    pub key: MaterialKey,
    pub material: Material,
}

impl DisplayMaterial {
    pub fn default_material() -> Self {
        Self { key: MaterialKey::Default, material: Material::default() }
    }

    pub fn is_opaque(&self) -> bool {
        self.material.is_opaque()
    }
}

/// Model material list with the default fallback for out of range indices.
#[derive(Clone, Debug, Default)]
pub struct MaterialTable {
    materials: Vec<Material>,
}

impl MaterialTable {
    pub fn new(materials: Vec<Material>) -> Self {
        Self { materials }
    }

    pub fn len(&self) -> usize {
        self.materials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.materials.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Material> {
        self.materials.get(index)
    }

    pub fn resolve(&self, index: Option<usize>) -> DisplayMaterial {
        match index.and_then(|i| self.materials.get(i).map(|m| (i, m))) {
            Some((i, material)) => DisplayMaterial { key: MaterialKey::Index(i), material: material.clone() },
            None => DisplayMaterial::default_material(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shininess_rescales_to_128() {
        let material = Material { shine: MAX_SHINE, ..Material::default() };
        assert!((material.shininess() - 128.0).abs() < 1e-6);
        assert_eq!(Material::default().shininess(), 0.0);
    }

    #[test]
    fn out_of_range_index_resolves_to_white_default() {
        let table = MaterialTable::new(vec![Material { name: "red".into(), diffuse: Color::rgb(255, 0, 0), ..Default::default() }]);
        assert_eq!(table.resolve(Some(0)).key, MaterialKey::Index(0));
        for index in [None, Some(3)] {
            let resolved = table.resolve(index);
            assert_eq!(resolved.key, MaterialKey::Default);
            assert_eq!(resolved.material.diffuse, Color::WHITE);
        }
    }

    #[test]
    fn transparency_controls_opacity() {
        let glass = Material { transparency: 0.25, ..Material::default() };
        assert!(!glass.is_opaque());
        assert!((glass.alpha() - 0.75).abs() < 1e-6);
        assert!(Material::default().is_opaque());
    }
}
