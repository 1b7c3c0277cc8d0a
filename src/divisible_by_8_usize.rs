/// A usize that is guaranteed to be divisible by 8, which allows storing an
/// additional bit of information in it.
#[repr(transparent)]
#[derive(Debug)]
pub struct DivisibleBy8Usize(usize);

impl DivisibleBy8Usize {
    /// Creates a divisible by 8 usize without checking if the given value is
    /// divisible by 8, and stores the given additional bit in it.
    /// This results in undefined behaviour if the value is not divisible by 8.
    pub const unsafe fn new_unchecked(n: usize, additional_bit: bool) -> Self {
        Self(n | additional_bit as usize)
    }

    /// Returns the divisible by 8 value as a `usize`.
    pub fn value(&self) -> usize {
        self.0 & !0b111
    }

    /// Returns the additional bit of information stored within the number.
    pub fn additional_bit(&self) -> bool {
        self.0 & 1 != 0
    }

    /// Sets the value of this divisible by 8 usize to the given value, without
    /// changing the additional bit stored within the number.
    ///
    /// # Safety
    ///
    /// The new value must be divisible by 8, otherwise the function panics.
    pub fn set_value(&mut self, new_value: usize) {
        if new_value & 0b111 != 0 {
            panic!("the value of a divisible by 8 usize must be divisible by 8");
        }
        self.0 = new_value | self.0 & 0b111;
    }

    /// Sets the additional bit of information stored within the number.
    pub fn set_additional_bit(&mut self, new_value: bool) {
        self.0 = (self.0 | 1) ^ usize::from(!new_value)
    }
}
