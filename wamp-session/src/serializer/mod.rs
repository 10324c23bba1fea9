mod serializer;

pub use serializer::SerializerType;
