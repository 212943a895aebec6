/// Lists every value of an enum. Derived with `condynsate_macros::ToVec`.
pub trait ToVec<T> {
    fn to_vec() -> Vec<T>;
}
