pub type Coordf32 = f32;

pub type Point  = nalgebra::Point3<Coordf32>;
pub type Vector = nalgebra::Vector3<Coordf32>;

#[allow(non_camel_case_types)] pub type Index3_u = [usize; 3];
#[allow(non_camel_case_types)] pub type Dim3_u   = [usize; 3];
